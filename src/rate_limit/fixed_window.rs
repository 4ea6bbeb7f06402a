use super::clock::{elapsed, shift, Clock};
use super::types::{Algorithm, Quotas, RateLimitResult, RateLimiter};
use crate::store::{CounterStore, MemoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of counter keys written by the fixed window limiter
pub const FIXED_WINDOW_PREFIX: &str = "rl:fixed";

/// Aligned window containing an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `start` as nanoseconds since the unix epoch, used in counter keys
    pub start_nanos: i64,
}

impl WindowBounds {
    /// Truncate `now` to a multiple of `window` since the unix epoch
    pub fn containing(now: DateTime<Utc>, window: Duration) -> Self {
        let window_nanos = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX).max(1);
        let now_nanos = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let start_nanos = now_nanos - now_nanos.rem_euclid(window_nanos);
        let start = DateTime::from_timestamp_nanos(start_nanos);

        Self {
            start,
            end: shift(start, window),
            start_nanos,
        }
    }
}

/// Fixed window limiter over a counter store
///
/// All requests for a key that arrive in the same aligned window share one
/// counter. Bursts of up to twice the limit are possible across a window
/// boundary. If the store fails the request is admitted.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    quotas: Quotas,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    /// Create a limiter counting through `store`
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, quotas: Quotas) -> Self {
        Self {
            store,
            quotas,
            clock,
        }
    }

    /// Create a limiter that counts in process
    pub fn in_memory(clock: Arc<dyn Clock>, quotas: Quotas) -> Self {
        let store = MemoryStore::with_cleanup_interval(
            clock.clone(),
            super::reaper::DEFAULT_REAP_INTERVAL,
        );
        Self::new(Arc::new(store), clock, quotas)
    }

    /// Counter key for a client in the window starting at `start_nanos`
    pub fn counter_key(api_key: &str, start_nanos: i64) -> String {
        format!("{}:{}:{}", FIXED_WINDOW_PREFIX, api_key, start_nanos)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(&self, api_key: &str) -> RateLimitResult {
        let config = self.quotas.config_for(api_key);
        let limit = config.limit();

        let now = self.clock.now();
        let window = WindowBounds::containing(now, config.window());
        let key = Self::counter_key(api_key, window.start_nanos);
        let ttl = elapsed(now, window.end);

        let count = match self.store.incr_with_ttl(&key, ttl).await {
            Ok((count, _)) => count,
            Err(e) => {
                warn!(
                    error = %e,
                    "Counter store unavailable, admitting request for key: {}",
                    api_key
                );
                return RateLimitResult::allowed(limit, limit, window.end);
            }
        };

        if count <= i64::from(limit) {
            let remaining = u32::try_from(i64::from(limit) - count).unwrap_or(0);
            RateLimitResult::allowed(remaining, limit, window.end)
        } else {
            debug!("Rate limit exceeded for key: {} (fixed window)", api_key);
            RateLimitResult::denied(limit, window.end)
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn shutdown(&self) {
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close counter store");
        }
    }
}
