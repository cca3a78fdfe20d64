use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Rate limiter error types
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    /// Whether this error came from talking to the storage backend.
    ///
    /// These are recovered by failing open; everything else is a
    /// construction-time problem.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            RateLimitError::Backend(_) | RateLimitError::Redis(_) | RateLimitError::Timeout(_)
        )
    }
}
