// src/limiter/mod.rs

pub mod engine;
pub mod key;
pub mod response;
pub mod skip;
pub mod threshold;

#[cfg(test)]
mod tests;

pub use engine::{Admission, Pending};
pub use key::{ClientAddress, KeyFn, KeyResolver};
pub use response::{DefaultHandler, HandlerFn, HandlerOutcome, LimitHandler, Message};
pub use skip::{Never, SkipFn, SkipPredicate};
pub use threshold::{AsyncThresholdFn, Fixed, ThresholdFn, ThresholdResolver};

use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{self, LimiterConfig, StoreConfig};
use crate::error::{RateLimiterError, Result};
use crate::storage::{MemoryStore, RedisStore, Store};
use response::MessageSource;

/// Rate limit state of one counted request.
///
/// Inserted into the request's extensions before the request is allowed or
/// denied, so downstream handlers can read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Cap that applied to this request
    pub limit: u64,
    /// Hits in the window, this request included
    pub current: u64,
    /// `limit - current`, floored at zero
    pub remaining: u64,
    /// When the key's window ends
    pub reset_time: DateTime<Utc>,
}

impl RateLimitInfo {
    pub fn new(limit: u64, current: u64, reset_time: DateTime<Utc>) -> Self {
        Self {
            limit,
            current,
            remaining: limit.saturating_sub(current),
            reset_time,
        }
    }

    /// The Nth request of a limit of N is still allowed
    pub fn is_over_limit(&self) -> bool {
        self.current > self.limit
    }

    /// Whole seconds until the window ends, rounded up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }
}

/// Response-side state of a request that has not reached the application yet.
///
/// The gate writes its headers here. On the allow path they are merged into
/// the downstream response; on the deny path the handler builds from them.
#[derive(Debug, Default)]
pub struct ResponseState {
    pub headers: HeaderMap,
    pub extensions: Extensions,
}

type LimitReachedFn = dyn Fn(&Parts, &RateLimitInfo) + Send + Sync;
type SuccessFn = dyn Fn(StatusCode) -> bool + Send + Sync;

pub(crate) struct Inner {
    pub(crate) window: Duration,
    pub(crate) threshold: Box<dyn ThresholdResolver>,
    pub(crate) key_resolver: Box<dyn KeyResolver>,
    pub(crate) skip: Box<dyn SkipPredicate>,
    pub(crate) handler: Box<dyn LimitHandler>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) headers: bool,
    pub(crate) skip_failed_requests: bool,
    pub(crate) skip_successful_requests: bool,
    pub(crate) request_was_successful: Box<SuccessFn>,
    pub(crate) on_limit_reached: Option<Box<LimitReachedFn>>,
    pub(crate) empty_key_reported: AtomicBool,
    /// Window end of the last limit report per key
    pub(crate) limit_reported: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// A mounted rate limiting gate.
///
/// Cloning is cheap; clones share configuration and store.
#[derive(Clone)]
pub struct RateLimiter {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.inner.window)
            .field("headers", &self.inner.headers)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Builds a gate from declarative configuration, connecting to Redis
    /// when the configuration asks for it.
    pub async fn from_config(config: LimiterConfig) -> Result<Self> {
        let builder = Self::builder()
            .window(config.window)
            .max(config.max)
            .message(config.message)
            .status_code(config.status_code)
            .headers(config.headers)
            .skip_failed_requests(config.skip_failed_requests)
            .skip_successful_requests(config.skip_successful_requests);

        let builder = match config.store {
            StoreConfig::Memory(memory) => {
                builder.store(MemoryStore::new(config.window, memory))
            }
            StoreConfig::Redis(redis) => {
                let store = RedisStore::new(config.window, redis).await?;
                store.ping().await?;
                builder.store(store)
            }
        };

        builder.build()
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Forgets everything the store knows about `key`
    pub async fn reset_key(&self, key: &str) -> Result<()> {
        tracing::info!(key, "Resetting rate limit key");
        self.inner.store.reset_key(key).await
    }

    /// Forgets every key, if the store supports it
    pub async fn reset_all(&self) -> Result<()> {
        tracing::info!("Resetting all rate limit keys");
        self.inner.store.reset_all().await
    }
}

/// Configures a [`RateLimiter`]. Every option has a default.
pub struct RateLimiterBuilder {
    window: Duration,
    threshold: Box<dyn ThresholdResolver>,
    message: MessageSource,
    status_code: u16,
    headers: bool,
    key_resolver: Box<dyn KeyResolver>,
    skip: Box<dyn SkipPredicate>,
    handler: Option<Box<dyn LimitHandler>>,
    store: Option<Arc<dyn Store>>,
    skip_failed_requests: bool,
    skip_successful_requests: bool,
    request_was_successful: Box<SuccessFn>,
    on_limit_reached: Option<Box<LimitReachedFn>>,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(60_000),
            threshold: Box::new(Fixed(5)),
            message: MessageSource::Fixed(Message::Text(config::default_message())),
            status_code: 429,
            headers: true,
            key_resolver: Box::new(ClientAddress::new()),
            skip: Box::new(Never),
            handler: None,
            store: None,
            skip_failed_requests: false,
            skip_successful_requests: false,
            request_was_successful: Box::new(|status: StatusCode| status.as_u16() < 400),
            on_limit_reached: None,
        }
    }
}

impl RateLimiterBuilder {
    /// Length of a key's counting window
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window_ms(self, millis: u64) -> Self {
        self.window(Duration::from_millis(millis))
    }

    /// Constant cap per key and window
    pub fn max(mut self, max: u64) -> Self {
        self.threshold = Box::new(Fixed(max));
        self
    }

    /// Cap computed per request
    pub fn max_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &ResponseState) -> Result<i64> + Send + Sync + 'static,
    {
        self.threshold = Box::new(ThresholdFn(f));
        self
    }

    /// Cap that has to be awaited per request
    pub fn max_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &ResponseState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<i64>> + Send + 'static,
    {
        self.threshold = Box::new(AsyncThresholdFn(f));
        self
    }

    pub fn threshold(mut self, resolver: impl ThresholdResolver + 'static) -> Self {
        self.threshold = Box::new(resolver);
        self
    }

    /// Rejection body used by the default handler
    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.message = MessageSource::Fixed(message.into());
        self
    }

    pub fn message_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &ResponseState) -> Message + Send + Sync + 'static,
    {
        self.message = MessageSource::Computed(Box::new(f));
        self
    }

    /// Rejection status used by the default handler
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Toggles X-RateLimit-Limit, X-RateLimit-Remaining and Retry-After
    pub fn headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    pub fn key_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &ResponseState) -> Result<String> + Send + Sync + 'static,
    {
        self.key_resolver = Box::new(KeyFn(f));
        self
    }

    pub fn key_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.key_resolver = Box::new(resolver);
        self
    }

    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &ResponseState) -> Result<bool> + Send + Sync + 'static,
    {
        self.skip = Box::new(SkipFn(f));
        self
    }

    pub fn skip_predicate(mut self, predicate: impl SkipPredicate + 'static) -> Self {
        self.skip = Box::new(predicate);
        self
    }

    /// Replaces the default rejection entirely
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, ResponseState, &RateLimitInfo) -> Result<HandlerOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(Box::new(HandlerFn(f)));
        self
    }

    pub fn limit_handler(mut self, handler: impl LimitHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Counting backend. Defaults to a [`MemoryStore`] using the gate's window.
    pub fn store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn skip_failed_requests(mut self, enabled: bool) -> Self {
        self.skip_failed_requests = enabled;
        self
    }

    pub fn skip_successful_requests(mut self, enabled: bool) -> Self {
        self.skip_successful_requests = enabled;
        self
    }

    /// Classifies final responses for the skip_*_requests options
    pub fn request_was_successful<F>(mut self, f: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.request_was_successful = Box::new(f);
        self
    }

    /// Called once per key and window, on the first denied request
    pub fn on_limit_reached<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &RateLimitInfo) + Send + Sync + 'static,
    {
        self.on_limit_reached = Some(Box::new(f));
        self
    }

    /// Validates the configuration and mounts the gate
    pub fn build(self) -> Result<RateLimiter> {
        if self.window.is_zero() {
            return Err(RateLimiterError::Config(
                "window must be longer than zero".to_string(),
            ));
        }

        let status = StatusCode::from_u16(self.status_code).map_err(|_| {
            RateLimiterError::Config(format!("invalid status code {}", self.status_code))
        })?;

        let handler: Box<dyn LimitHandler> = match self.handler {
            Some(handler) => handler,
            None => Box::new(DefaultHandler::new(status, self.message)),
        };
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::with_window(self.window)),
        };

        tracing::debug!(
            window_ms = self.window.as_millis() as u64,
            headers = self.headers,
            store = ?store,
            "Rate limiter mounted"
        );

        Ok(RateLimiter {
            inner: Arc::new(Inner {
                window: self.window,
                threshold: self.threshold,
                key_resolver: self.key_resolver,
                skip: self.skip,
                handler,
                store,
                headers: self.headers,
                skip_failed_requests: self.skip_failed_requests,
                skip_successful_requests: self.skip_successful_requests,
                request_was_successful: self.request_was_successful,
                on_limit_reached: self.on_limit_reached,
                empty_key_reported: AtomicBool::new(false),
                limit_reported: Mutex::new(HashMap::new()),
            }),
        })
    }
}
