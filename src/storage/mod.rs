// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use super::error::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;

/// Outcome of a single increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementResponse {
    /// Hits recorded for the key in the current window, including this one
    pub count: u64,

    /// When the current window for the key ends
    pub reset_time: DateTime<Utc>,
}

/// Core trait that all counting stores must implement.
///
/// A store owns one counter per key together with the instant its window
/// ends. `increment`, `decrement` and `reset_key` are required; a type that
/// does not provide them is not a store:
///
/// ```compile_fail
/// use async_trait::async_trait;
/// use rate_limiter::storage::Store;
///
/// #[derive(Debug)]
/// struct ForgetfulStore;
///
/// #[async_trait]
/// impl Store for ForgetfulStore {
///     async fn decrement(&self, _key: &str) -> rate_limiter::Result<()> {
///         Ok(())
///     }
///
///     async fn reset_key(&self, _key: &str) -> rate_limiter::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Atomically records one hit for `key`.
    ///
    /// Starts a fresh window with `count = 1` when the key has no live
    /// counter, otherwise bumps the count and returns the existing reset time.
    async fn increment(&self, key: &str) -> Result<IncrementResponse>;

    /// Takes one hit back from `key`, never going below zero.
    async fn decrement(&self, key: &str) -> Result<()>;

    /// Forgets `key` entirely
    async fn reset_key(&self, key: &str) -> Result<()>;

    /// Forgets every key
    async fn reset_all(&self) -> Result<()> {
        Err(StorageError::Unsupported("reset_all").into())
    }
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn increment(&self, key: &str) -> Result<IncrementResponse> {
        (**self).increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        (**self).decrement(key).await
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        (**self).reset_key(key).await
    }

    async fn reset_all(&self) -> Result<()> {
        (**self).reset_all().await
    }
}
