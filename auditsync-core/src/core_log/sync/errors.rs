/*
    errors.rs - Error taxonomy for synchronization

    - Configuration: malformed URL or missing setting; not retried until the
      configuration changes
    - TransientNetwork: connection refused, timeout, other I/O; retried on the
      next scheduled tick
    - Protocol: the remote answered, but with a non-2xx status or a body
      that does not decode
    - Store: local storage failures
*/

use crate::core_log::store::StoreError;
use thiserror::Error;

/// Errors that can occur during a sync cycle
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether the next scheduled cycle may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Configuration(_) => false,
            SyncError::TransientNetwork(_) | SyncError::Protocol(_) => true,
            SyncError::Store(e) => e.is_retryable(),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Configuration(format!("malformed URL: {}", err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            SyncError::Configuration(err.to_string())
        } else if err.is_connect() {
            SyncError::TransientNetwork(format!("connection failed: {}", err))
        } else if err.is_timeout() {
            SyncError::TransientNetwork(format!("timed out: {}", err))
        } else {
            SyncError::TransientNetwork(err.to_string())
        }
    }
}
