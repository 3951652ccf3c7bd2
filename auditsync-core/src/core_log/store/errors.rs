/*
    errors.rs - Error types for the log store
*/

use thiserror::Error;

/// Errors that can occur in the log store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another operation holds the log's lock; retry later
    #[error("Log {target_id}/{log_id} is busy")]
    Busy { target_id: String, log_id: u64 },

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted record could not be decoded
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether the same call may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}
