//! Error types for the mirror engine.

use snapsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while exporting or uploading a snapshot.
///
/// None of these escape the scheduler or bootstrap boundary; both convert
/// every error into a structured outcome. Sync is best-effort background
/// maintenance and must never be fatal to the host.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A chunk failed hash verification. Fatal to the current run.
    #[error("integrity error for {store} chunk {index}: {reason}")]
    Integrity {
        /// Store (or global scope) the chunk belonged to.
        store: String,
        /// Chunk sequence index.
        index: u32,
        /// Why verification failed.
        reason: String,
    },

    /// The remote cache rejected a request.
    #[error("remote rejected request: {0}")]
    Remote(String),

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The local record source failed.
    #[error("source error: {0}")]
    Source(String),

    /// The run was cancelled cooperatively.
    #[error("sync cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an integrity error for a chunk.
    pub fn integrity(store: impl Into<String>, index: u32, reason: impl Into<String>) -> Self {
        Self::Integrity {
            store: store.into(),
            index,
            reason: reason.into(),
        }
    }

    /// Returns true if the failed operation can be retried.
    ///
    /// Integrity failures and cancellation are never retryable; the next
    /// eligible debounce window starts a fresh run instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport { retryable: true, .. })
    }
}

impl From<ProtocolError> for EngineError {
    fn from(e: ProtocolError) -> Self {
        EngineError::Codec(e.to_string())
    }
}
