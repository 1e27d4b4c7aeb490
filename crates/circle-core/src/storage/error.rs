//! Error types for storage operations.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying I/O or database failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// State could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Serialization failures are deterministic and never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        assert!(StorageError::Io("disk full".to_string()).is_transient());
        assert!(!StorageError::Serialization("bad cbor".to_string()).is_transient());
    }
}
