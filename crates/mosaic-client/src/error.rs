//! Error types for the verifying client.

use thiserror::Error;

use mosaic_crypto::NoteError;

/// Errors raised by the verifying client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The fetched resource does not exist (yet) at the requested size.
    #[error("not found: {0}")]
    NotFound(String),

    /// Fetched bytes do not decode to the expected object.
    #[error("malformed {0}")]
    Malformed(String),

    /// Checkpoint note parsing or signature verification failed.
    #[error(transparent)]
    Note(#[from] NoteError),

    /// The addressed node does not exist in the fetched tile.
    #[error("node out of range: {0}")]
    OutOfRange(String),

    /// A proof has the wrong shape or does not reproduce the claimed root.
    #[error("proof invalid: {0}")]
    Proof(String),

    /// Two signed checkpoints commit to irreconcilable trees.
    #[error("fork detected: {0}")]
    ForkDetected(String),

    /// Fetching a resource failed for a non-NotFound reason.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The awaited submission itself failed.
    #[error("append failed: {0}")]
    Append(String),
}

impl ClientError {
    /// Create a new NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new Malformed error.
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }

    /// Create a new OutOfRange error.
    pub fn out_of_range(what: impl Into<String>) -> Self {
        Self::OutOfRange(what.into())
    }

    /// Create a new Proof error.
    pub fn proof(what: impl Into<String>) -> Self {
        Self::Proof(what.into())
    }

    /// True when the resource simply is not there yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
