use super::CounterStore;
use crate::error::Result;
use crate::rate_limit::clock::{elapsed, shift, Clock, SystemClock};
use crate::rate_limit::reaper::{Reaper, DEFAULT_REAP_INTERVAL};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

struct Counters {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl Counters {
    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

/// In-process counter store
///
/// Each increment runs under the entry's shard lock. Expired entries are
/// treated as absent on access and removed by a periodic sweep.
pub struct MemoryStore {
    counters: Arc<Counters>,
    sweeper: Mutex<Option<Reaper>>,
}

impl MemoryStore {
    /// Create a store on the system clock with the default sweep interval
    pub fn new() -> Self {
        Self::with_cleanup_interval(Arc::new(SystemClock), DEFAULT_REAP_INTERVAL)
    }

    /// Create a store with an explicit clock and sweep interval
    ///
    /// A zero interval falls back to the default.
    pub fn with_cleanup_interval(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_REAP_INTERVAL
        } else {
            interval
        };

        let counters = Arc::new(Counters {
            entries: DashMap::new(),
            clock,
        });

        let sweep_target = counters.clone();
        let sweeper = Reaper::spawn("memory_store", interval, move || {
            sweep_target.purge_expired()
        });

        Self {
            counters,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Remove every expired entry now
    pub fn purge_expired(&self) -> usize {
        self.counters.purge_expired()
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.counters.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, Duration)> {
        let now = self.counters.clock.now();
        let fresh = Entry {
            value: 0,
            expires_at: shift(now, ttl),
        };

        let mut entry = self
            .counters
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating counter for key: {}", key);
                fresh
            });

        if entry.is_expired(now) {
            *entry = fresh;
        }
        entry.value += 1;

        Ok((entry.value, elapsed(now, entry.expires_at)))
    }

    async fn close(&self) -> Result<()> {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        Ok(())
    }
}
