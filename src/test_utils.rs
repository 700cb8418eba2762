// src/test_utils.rs

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::Request;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::{Result, StorageError};
use super::limiter::{RateLimiter, RateLimiterBuilder};
use super::storage::{IncrementResponse, MemoryStore, Store};

/// A request arriving from `ip`, as axum's connect-info service delivers it
pub fn request_from(ip: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{}:40000", ip).parse().unwrap();
    Request::builder()
        .uri("/")
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap()
}

/// Request head only, for driving the engine directly
pub fn parts_from(ip: &str) -> Parts {
    request_from(ip).into_parts().0
}

/// Builder preset with a memory store and the given limits
pub fn limiter_builder(max: u64, window: Duration) -> RateLimiterBuilder {
    RateLimiter::builder()
        .window(window)
        .max(max)
        .store(MemoryStore::with_window(window))
}

pub fn create_test_limiter(max: u64, window: Duration) -> RateLimiter {
    limiter_builder(max, window).build().unwrap()
}

/// Store whose backend is always down
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn increment(&self, _key: &str) -> Result<IncrementResponse> {
        Err(StorageError::RedisConnection("backend unavailable".to_string()).into())
    }

    async fn decrement(&self, _key: &str) -> Result<()> {
        Err(StorageError::RedisConnection("backend unavailable".to_string()).into())
    }

    async fn reset_key(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Memory store that keeps track of how often hits were given back.
///
/// Implements only the required operations, so `reset_all` is unsupported.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    memory: MemoryStore,
    decrements: Arc<AtomicUsize>,
}

impl RecordingStore {
    pub fn new(window: Duration) -> Self {
        Self {
            memory: MemoryStore::with_window(window),
            decrements: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn decrements(&self) -> usize {
        self.decrements.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn increment(&self, key: &str) -> Result<IncrementResponse> {
        self.memory.increment(key).await
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        self.decrements.fetch_add(1, Ordering::SeqCst);
        self.memory.decrement(key).await
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        self.memory.reset_key(key).await
    }
}
