// library entry
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod middleware;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use config::LimiterConfig;
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::{RateLimitInfo, RateLimiter, RateLimiterBuilder, ResponseState};
pub use logging::init as init_logging;
pub use middleware::{handle_error, RateLimitLayer, RateLimitService};
pub use storage::{IncrementResponse, MemoryStore, RedisStore, Store};
