use super::clock::{elapsed, shift, Clock};
use super::reaper::{Reaper, DEFAULT_REAP_INTERVAL};
use super::types::{Algorithm, Quotas, RateLimitResult, RateLimiter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct TokenBucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

struct Inner {
    clients: Mutex<HashMap<String, TokenBucketState>>,
    quotas: Quotas,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let before = clients.len();

        clients.retain(|key, state| {
            elapsed(state.last_refill, now) <= self.quotas.config_for(key).window()
        });

        before - clients.len()
    }
}

/// Continuous-refill token bucket limiter
///
/// Each key owns a bucket of capacity `limit` refilled at `limit / window`
/// tokens per second. `reset_at` is always `now + window`; it does not report
/// when the next token becomes available.
pub struct TokenBucketLimiter {
    inner: Arc<Inner>,
    reaper: Mutex<Option<Reaper>>,
}

impl TokenBucketLimiter {
    pub fn new(clock: Arc<dyn Clock>, quotas: Quotas) -> Self {
        Self::with_reap_interval(clock, quotas, DEFAULT_REAP_INTERVAL)
    }

    pub fn with_reap_interval(clock: Arc<dyn Clock>, quotas: Quotas, interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            clients: Mutex::new(HashMap::new()),
            quotas,
            clock,
        });

        let target = inner.clone();
        let reaper = Reaper::spawn("token_bucket", interval, move || target.evict_idle());

        Self {
            inner,
            reaper: Mutex::new(reaper),
        }
    }

    /// Drop every bucket not refilled for longer than its window
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// Get the number of tracked keys (for testing/monitoring)
    pub fn active_keys(&self) -> usize {
        self.inner.clients.lock().len()
    }

    #[cfg(test)]
    fn tokens(&self, key: &str) -> Option<f64> {
        self.inner.clients.lock().get(key).map(|state| state.tokens)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, api_key: &str) -> RateLimitResult {
        let inner = &self.inner;
        let config = inner.quotas.config_for(api_key);
        let limit = config.limit();
        let window = config.window();

        let mut clients = inner.clients.lock();
        let now = inner.clock.now();
        let reset_at = shift(now, window);

        let state = match clients.get_mut(api_key) {
            Some(state) => state,
            None => {
                debug!("Creating token bucket for key: {}", api_key);
                clients.insert(
                    api_key.to_string(),
                    TokenBucketState {
                        tokens: f64::from(limit - 1),
                        last_refill: now,
                    },
                );
                return RateLimitResult::allowed(limit - 1, limit, reset_at);
            }
        };

        let capacity = f64::from(limit);
        let refill_rate = capacity / window.as_secs_f64();
        let refilled = elapsed(state.last_refill, now).as_secs_f64() * refill_rate;

        state.tokens = (state.tokens + refilled).min(capacity);
        state.last_refill = now;

        if state.tokens < 1.0 {
            debug!("Rate limit exceeded for key: {} (token bucket)", api_key);
            return RateLimitResult::denied(limit, reset_at);
        }

        state.tokens -= 1.0;
        RateLimitResult::allowed(state.tokens.floor() as u32, limit, reset_at)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn shutdown(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }
    }
}
