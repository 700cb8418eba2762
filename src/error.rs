// for error definitions
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Invalid gate or store configuration, raised before requests are handled
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Failure reported by a caller-supplied key generator, skip predicate,
    /// threshold resolver or limit handler. The gate passes it through as is.
    #[error("Resolution error: {0}")]
    Resolution(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The in-memory store is full of live counters
    #[error("Store capacity exceeded: {0} live counters")]
    CapacityExceeded(usize),

    /// A thread panicked while holding the counter map
    #[error("Counter map lock poisoned")]
    LockPoisoned,

    /// The store does not implement an optional operation
    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

impl From<StorageError> for RateLimiterError {
    fn from(err: StorageError) -> Self {
        RateLimiterError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                // authentication errors
                RateLimiterError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                RateLimiterError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => {
                // Command/operation related errors
                RateLimiterError::Storage(StorageError::RedisCommand(err.to_string()))
            }
        }
    }
}

// configuration documents are the only JSON we parse
impl From<serde_json::Error> for RateLimiterError {
    fn from(err: serde_json::Error) -> Self {
        RateLimiterError::Config(err.to_string())
    }
}

/// Renders an internal gate failure for `HandleErrorLayer`-style error handlers.
impl IntoResponse for RateLimiterError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Rate limiter failed to reach a decision");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
