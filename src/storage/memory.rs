// src/storage/memory.rs

// In-memory counting store, the default backend of the gate.
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::InMemoryConfig;
use crate::error::{Result, StorageError};
use crate::storage::{IncrementResponse, Store};
use crate::storage_op;

/// A key's hits in its current window
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    reset_time: DateTime<Utc>,
}

impl Counter {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.reset_time > now
    }
}

type CounterMap = HashMap<String, Counter>;

const INITIAL_CAPACITY: usize = 1024;

// smallest map size at which inserting a key triggers an incidental purge
const PURGE_FLOOR: usize = 1024;

/// Aborts the sweeper when the last store handle goes away
#[derive(Debug)]
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-memory store.
///
/// Expiry is lazy: a counter whose window has ended is treated as absent the
/// next time its key is touched. Expired counters are also dropped by an
/// optional background sweep and by an incidental purge each time the map
/// grows to a power of two, starting at 1024 entries. With `max_entries` set,
/// a new key that finds the map full of live counters is refused.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    counters: Arc<Mutex<CounterMap>>,
    window: TimeDelta,
    config: InMemoryConfig,
    _cleanup_task: Option<Arc<CleanupTask>>,
}

impl MemoryStore {
    /// Creates a store whose windows last `window`.
    ///
    /// The background sweep only starts when called inside a tokio runtime;
    /// elsewhere the store relies on incidental purging.
    pub fn new(window: Duration, config: InMemoryConfig) -> Self {
        let counters = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.unwrap_or(INITIAL_CAPACITY).min(INITIAL_CAPACITY),
        )));

        let cleanup_task = match Handle::try_current() {
            Ok(handle) if config.use_background_task => {
                let weak = Arc::downgrade(&counters);
                let period = config.cleanup_interval;
                let task = handle.spawn(Self::sweep(weak, period));
                Some(Arc::new(CleanupTask(task)))
            }
            Ok(_) => None,
            Err(_) => {
                if config.use_background_task {
                    tracing::debug!("No tokio runtime, memory store falls back to incidental cleanup");
                }
                None
            }
        };

        Self {
            counters,
            window: to_time_delta(window),
            config,
            _cleanup_task: cleanup_task,
        }
    }

    /// Creates a store with the default memory configuration
    pub fn with_window(window: Duration) -> Self {
        Self::new(window, InMemoryConfig::default())
    }

    /// Number of counters currently held, live or not yet purged
    pub fn len(&self) -> usize {
        self.lock().map(|counters| counters.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn sweep(counters: Weak<Mutex<CounterMap>>, period: Duration) {
        let mut interval = time::interval(period);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(map) = counters.upgrade() else {
                break;
            };
            let purged = match map.lock() {
                Ok(mut counters) => purge_expired(&mut counters, Utc::now()),
                Err(_) => {
                    tracing::error!("Counter map poisoned, stopping sweep");
                    break;
                }
            };
            if purged > 0 {
                tracing::debug!(purged, "Swept expired counters");
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CounterMap>> {
        self.counters
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn increment_locked(&self, key: &str) -> Result<IncrementResponse> {
        let now = Utc::now();
        let mut counters = self.lock()?;

        if !counters.contains_key(key) {
            let len = counters.len();
            match self.config.max_entries {
                Some(max_entries) if len >= max_entries => {
                    let purged = purge_expired(&mut counters, now);
                    tracing::debug!(purged, "Memory store full, purged expired counters");
                    if counters.len() >= max_entries {
                        return Err(StorageError::CapacityExceeded(counters.len()).into());
                    }
                }
                _ if len >= PURGE_FLOOR && len.is_power_of_two() => {
                    let purged = purge_expired(&mut counters, now);
                    tracing::debug!(purged, remaining = counters.len(), "Purged expired counters");
                }
                _ => {}
            }
        }

        let fresh = Counter {
            count: 0,
            reset_time: now
                .checked_add_signed(self.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let counter = counters.entry(key.to_string()).or_insert(fresh);
        if !counter.is_live(now) {
            *counter = fresh;
        }
        counter.count += 1;

        Ok(IncrementResponse {
            count: counter.count,
            reset_time: counter.reset_time,
        })
    }
}

fn purge_expired(counters: &mut CounterMap, now: DateTime<Utc>) -> usize {
    let before = counters.len();
    counters.retain(|_, counter| counter.is_live(now));
    before - counters.len()
}

fn to_time_delta(window: Duration) -> TimeDelta {
    let millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX)
}

#[async_trait]
impl Store for MemoryStore {
    async fn increment(&self, key: &str) -> Result<IncrementResponse> {
        let started = Instant::now();
        let result = self.increment_locked(key);
        storage_op!("increment", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn decrement(&self, key: &str) -> Result<()> {
        let now = Utc::now();
        let mut counters = self.lock()?;

        let expired = match counters.get_mut(key) {
            Some(counter) if counter.is_live(now) => {
                counter.count = counter.count.saturating_sub(1);
                false
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            counters.remove(key);
        }

        Ok(())
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn reset_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}
