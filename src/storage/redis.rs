// src/storage/redis.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::{IncrementResponse, Store};
use crate::storage_op;

// The window end is fixed by the server clock on the first hit and stored
// next to the count, so every hit in a window reports the same reset time
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
local reset = tonumber(redis.call('HGET', KEYS[1], 'reset') or '0')
if count == 1 or reset == 0 or redis.call('PTTL', KEYS[1]) < 0 then
  local now = redis.call('TIME')
  reset = tonumber(now[1]) * 1000 + math.floor(tonumber(now[2]) / 1000) + tonumber(ARGV[1])
  redis.call('HSET', KEYS[1], 'reset', reset)
  redis.call('PEXPIREAT', KEYS[1], reset)
end
return {count, reset}
"#;

const DECREMENT_SCRIPT: &str = r#"
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
if count > 0 then
  redis.call('HINCRBY', KEYS[1], 'count', -1)
end
return count
"#;

const SCAN_BATCH: usize = 500;

/// Redis-backed counting store.
///
/// Counters from every process sharing the Redis server are pooled, which
/// makes the limit global within the precision Redis itself offers.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisConfig,
    window_ms: i64,
    increment_script: Script,
    decrement_script: Script,
}

// Manually implement Debug
impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("key_prefix", &self.config.key_prefix)
            .field("window_ms", &self.window_ms)
            .finish()
    }
}

impl RedisStore {
    /// Connects to Redis and creates a store whose windows last `window`
    pub async fn new(window: Duration, config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| RateLimiterError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection_future = ConnectionManager::new(client);

        let connection =
            match tokio::time::timeout(config.connection_timeout, connection_future).await {
                Ok(result) => result.map_err(|e| {
                    RateLimiterError::Storage(StorageError::RedisConnection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(RateLimiterError::Storage(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis at {} timed out after {:?}",
                            config.url, config.connection_timeout
                        ),
                    )));
                }
            };

        let window_ms = i64::try_from(window.as_millis()).map_err(|_| {
            RateLimiterError::Config(format!("window of {:?} is too long for Redis", window))
        })?;

        Ok(Self {
            connection,
            config,
            window_ms,
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
        })
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping_future = conn.ping::<String>();

        let result = match tokio::time::timeout(self.config.connection_timeout, ping_future).await {
            Ok(inner_result) => inner_result?,
            Err(_) => {
                return Err(RateLimiterError::Storage(StorageError::RedisCommand(
                    format!(
                        "Redis PING operation timed out after {:?}",
                        self.config.connection_timeout
                    ),
                )));
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(RateLimiterError::Storage(StorageError::RedisCommand(
                format!("Unexpected response from Redis PING: {}", result),
            )))
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn run_increment(&self, key: &str) -> Result<IncrementResponse> {
        let mut conn = self.connection.clone();
        let mut invocation = self.increment_script.key(self.prefixed(key));
        invocation.arg(self.window_ms);
        let (count, reset_ms): (i64, i64) = invocation.invoke_async(&mut conn).await?;

        let count = u64::try_from(count).map_err(|_| {
            RateLimiterError::Storage(StorageError::RedisCommand(format!(
                "counter for {} went negative: {}",
                key, count
            )))
        })?;
        let reset_time = DateTime::<Utc>::from_timestamp_millis(reset_ms).ok_or_else(|| {
            RateLimiterError::Storage(StorageError::RedisCommand(format!(
                "reset time for {} out of range: {}",
                key, reset_ms
            )))
        })?;

        Ok(IncrementResponse { count, reset_time })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn increment(&self, key: &str) -> Result<IncrementResponse> {
        let started = Instant::now();
        let result = self.run_increment(key).await;
        storage_op!("increment", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let invocation = self.decrement_script.key(self.prefixed(key));
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(self.prefixed(key)).await?;
        Ok(())
    }

    async fn reset_all(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.config.key_prefix);
        let mut cursor: u64 = 0;
        let mut removed: usize = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let _: i64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += keys.len();
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(removed, prefix = %self.config.key_prefix, "Reset all Redis counters");
        Ok(())
    }
}
