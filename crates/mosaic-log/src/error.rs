//! Error types for the writer.

use thiserror::Error;

use mosaic_storage::StoreError;

/// Errors surfaced to callers of `add`.
///
/// A batch fails as a unit, so this type is `Clone` to fan one failure out
/// to every caller waiting on the batch.
#[derive(Debug, Clone, Error)]
pub enum AppendError {
    /// The appender was constructed with invalid options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The antispam follower is too far behind; try again later.
    #[error("overloaded, retry later")]
    Overloaded,

    /// The appender is shutting down and refuses new work.
    #[error("shutting down")]
    ShuttingDown,

    /// The integrator failed to commit the batch.
    #[error("integration failed: {0}")]
    Integration(#[from] StoreError),
}

/// Errors inside the antispam follower.
#[derive(Debug, Error)]
pub enum FollowerError {
    /// The dedup index store failed.
    #[error("dedup index: {0}")]
    Index(String),

    /// Reading from the log failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Committed bundle bytes do not parse. Fatal to the follower.
    #[error("corrupt bundle: {0}")]
    Corrupt(String),
}

impl FollowerError {
    /// Create a new Index error.
    pub fn index(what: impl Into<String>) -> Self {
        Self::Index(what.into())
    }

    /// True when retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}
