// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Declarative configuration for a rate limiting gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// How long a key's counter accumulates before it resets
    #[serde(
        rename = "window_ms",
        default = "default_window",
        with = "duration_serde"
    )]
    pub window: Duration,

    /// Requests allowed per key in one window
    #[serde(default = "default_max")]
    pub max: u64,

    /// Body sent with rejections
    #[serde(default = "default_message")]
    pub message: String,

    /// Status code sent with rejections
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    /// Whether to emit X-RateLimit-* and Retry-After headers
    #[serde(default = "default_headers")]
    pub headers: bool,

    /// Give back the hit when the downstream response counts as failed
    #[serde(default)]
    pub skip_failed_requests: bool,

    /// Give back the hit when the downstream response counts as successful
    #[serde(default)]
    pub skip_successful_requests: bool,

    /// Backing store for the counters
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_window() -> Duration {
    Duration::from_millis(60_000)
}

fn default_max() -> u64 {
    5
}

pub(crate) fn default_message() -> String {
    "Too many requests, please try again later.".to_string()
}

fn default_status_code() -> u16 {
    429
}

fn default_headers() -> bool {
    true
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max: default_max(),
            message: default_message(),
            status_code: default_status_code(),
            headers: default_headers(),
            skip_failed_requests: false,
            skip_successful_requests: false,
            store: StoreConfig::default(),
        }
    }
}

impl LimiterConfig {
    /// Parses a JSON configuration document. Missing fields take their defaults.
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Reads the configuration from `RATE_LIMIT_*` environment variables.
    ///
    /// Unset variables keep their defaults. Setting `RATE_LIMIT_REDIS_URL`
    /// selects the Redis store.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(window_ms) = env_var::<u64>("RATE_LIMIT_WINDOW_MS")? {
            config.window = Duration::from_millis(window_ms);
        }
        if let Some(max) = env_var("RATE_LIMIT_MAX")? {
            config.max = max;
        }
        if let Some(status_code) = env_var("RATE_LIMIT_STATUS_CODE")? {
            config.status_code = status_code;
        }
        if let Some(headers) = env_var("RATE_LIMIT_HEADERS")? {
            config.headers = headers;
        }
        if let Some(message) = env_var("RATE_LIMIT_MESSAGE")? {
            config.message = message;
        }
        if let Some(url) = env_var::<String>("RATE_LIMIT_REDIS_URL")? {
            config.store = StoreConfig::Redis(RedisConfig::new(url));
        }

        Ok(config)
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RateLimiterError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(RateLimiterError::Config(format!("{}: {}", name, e))),
    }
}

/// Which store backs the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory(InMemoryConfig),
    Redis(RedisConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(InMemoryConfig::default())
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout
    #[serde(
        rename = "connection_timeout_ms",
        default = "default_conn_timeout",
        with = "duration_serde"
    )]
    pub connection_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

fn default_key_prefix() -> String {
    "rl:".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Optional cap on counters held at once. Unset means unbounded: expired
    /// counters are still purged, but live clients are never refused.
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(
        rename = "cleanup_interval_ms",
        default = "default_cleanup_interval",
        with = "duration_serde"
    )]
    pub cleanup_interval: Duration,
}

// serde defaults only apply when deserializing, so mirror them here
impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
