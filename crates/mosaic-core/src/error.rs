//! Error types for mosaic-core codecs and layout parsing.

use thiserror::Error;

/// Errors produced while encoding or decoding Mosaic wire objects.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input bytes or path text do not form a valid object.
    #[error("malformed {0}")]
    Malformed(String),

    /// An entry payload exceeds the bundle serialization limit.
    #[error("entry of {0} bytes exceeds the {max} byte limit", max = u16::MAX)]
    EntryTooLarge(usize),
}

impl CodecError {
    /// Create a new Malformed error.
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }
}
