//! Error types for state persistence.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in a key-value backend.
///
/// These never escape [`crate::SyncStateStore`]; they surface only to code
/// that talks to a backend directly.
#[derive(Debug, Error)]
pub enum StateError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted state file could not be decoded.
    #[error("state file corrupted: {0}")]
    Corrupted(String),

    /// The state file is locked by another process.
    #[error("state file locked: {0}")]
    Locked(String),

    /// Serialization of the state map failed.
    #[error("encode error: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StateError::Corrupted("truncated map".into());
        assert!(err.to_string().contains("truncated map"));
    }
}
