//! Error types for mosaic-storage.

use thiserror::Error;

/// Errors that can occur in driver operations.
///
/// Variants carry `String` causes so errors stay cloneable when fanned out
/// to every caller of a failed batch.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O error in the underlying store.
    #[error("I/O error: {0}")]
    Io(String),

    /// The addressed object does not exist at the requested size.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored bytes do not decode to the expected object.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Error serializing an internal record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A concurrent writer invalidated this transaction.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Stored state was written under an incompatible schema version.
    #[error("schema version {found}, this build requires {want}")]
    SchemaMismatch {
        /// Version found in the store.
        found: u32,
        /// Version this build writes.
        want: u32,
    },
}

impl StoreError {
    /// Create a new NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new Corrupt error.
    pub fn corrupt(what: impl Into<String>) -> Self {
        Self::Corrupt(what.into())
    }

    /// Create a new I/O error.
    pub fn io(what: impl Into<String>) -> Self {
        Self::Io(what.into())
    }

    /// True when the object simply is not there yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<postcard::Error> for StoreError {
    fn from(err: postcard::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_helper() {
        let err = StoreError::not_found("tile/0/000");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("tile/0/000"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!err.is_not_found());
    }
}
