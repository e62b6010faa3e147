//! Error types for checkpoint notes.

use thiserror::Error;

/// Errors raised while forming or verifying checkpoint notes.
#[derive(Debug, Error)]
pub enum NoteError {
    /// Note, body or key string does not parse.
    #[error("malformed {0}")]
    Malformed(String),

    /// No configured verifier vouches for the note, or the origin differs.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
}

impl NoteError {
    /// Create a new Malformed error.
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }

    /// Create a new SignatureInvalid error.
    pub fn signature(what: impl Into<String>) -> Self {
        Self::SignatureInvalid(what.into())
    }
}
