use super::clock::{elapsed, shift, shift_back, Clock};
use super::reaper::{Reaper, DEFAULT_REAP_INTERVAL};
use super::types::{Algorithm, Quotas, RateLimitResult, RateLimiter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on the per-key capacity reserved up front
const SLIDING_WINDOW_CAP_MAX: usize = 256;

struct SlidingWindowState {
    /// Admission instants in arrival order; a clock step backwards can
    /// leave them unsorted
    timestamps: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

struct Inner {
    clients: Mutex<HashMap<String, SlidingWindowState>>,
    quotas: Quotas,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let mut clients = self.clients.lock();
        let before = clients.len();

        clients.retain(|key, state| {
            elapsed(state.last_seen, now) <= self.quotas.config_for(key).window()
        });

        before - clients.len()
    }
}

/// Instant the oldest logged admission leaves the window
fn oldest_expiry(
    timestamps: &VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> DateTime<Utc> {
    timestamps
        .iter()
        .min()
        .map_or(shift(now, window), |oldest| shift(*oldest, window))
}

/// Exact sliding log limiter
///
/// A key is admitted while fewer than `limit` of its admissions fall inside
/// the trailing window. Idle keys are dropped by a background reaper.
pub struct SlidingWindowLimiter {
    inner: Arc<Inner>,
    reaper: Mutex<Option<Reaper>>,
}

impl SlidingWindowLimiter {
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
        let reaper = Reaper::spawn("sliding_window", interval, move || target.evict_idle());

        Self {
            inner,
            reaper: Mutex::new(reaper),
        }
    }

    /// Drop every key idle for longer than its window
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// Get the number of tracked keys (for testing/monitoring)
    pub fn active_keys(&self) -> usize {
        self.inner.clients.lock().len()
    }

    #[cfg(test)]
    fn is_tracked(&self, key: &str) -> bool {
        self.inner.clients.lock().contains_key(key)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, api_key: &str) -> RateLimitResult {
        let inner = &self.inner;
        let config = inner.quotas.config_for(api_key);
        let limit = config.limit();
        let window = config.window();

        let mut clients = inner.clients.lock();
        let now = inner.clock.now();

        let state = clients.entry(api_key.to_string()).or_insert_with(|| {
            debug!("Creating sliding window for key: {}", api_key);
            SlidingWindowState {
                timestamps: VecDeque::with_capacity((limit as usize).min(SLIDING_WINDOW_CAP_MAX)),
                last_seen: now,
            }
        });
        state.last_seen = now;

        let window_start = shift_back(now, window);
        state.timestamps.retain(|ts| *ts >= window_start);

        if state.timestamps.len() >= limit as usize {
            let reset_at = oldest_expiry(&state.timestamps, now, window);
            debug!("Rate limit exceeded for key: {} (sliding window)", api_key);
            return RateLimitResult::denied(limit, reset_at);
        }

        state.timestamps.push_back(now);
        let remaining = limit - state.timestamps.len() as u32;
        let reset_at = oldest_expiry(&state.timestamps, now, window);

        RateLimitResult::allowed(remaining, limit, reset_at)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    async fn shutdown(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::FakeClock;
    use crate::rate_limit::types::LimitConfig;
    use chrono::{TimeDelta, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn limiter(limit: u32, window: Duration) -> (Arc<FakeClock>, SlidingWindowLimiter) {
        let clock = Arc::new(FakeClock::new(start()));
        let quotas = Quotas::new(LimitConfig::new(limit, window).unwrap());
        (clock.clone(), SlidingWindowLimiter::new(clock, quotas))
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_denies() {
        let (_clock, limiter) = limiter(3, Duration::from_secs(2));

        for expected in [2, 1, 0] {
            let result = limiter.allow("k").await;
            assert!(result.allowed);
            assert_eq!(result.remaining, expected);
        }

        let denied = limiter.allow("k").await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, start() + TimeDelta::seconds(2));
    }

    #[tokio::test]
    async fn test_reset_at_tracks_oldest_admission() {
        let (clock, limiter) = limiter(2, Duration::from_secs(10));

        let first = limiter.allow("k").await;
        assert_eq!(first.reset_at, start() + TimeDelta::seconds(10));

        clock.advance(Duration::from_secs(4));
        let second = limiter.allow("k").await;
        assert_eq!(second.reset_at, start() + TimeDelta::seconds(10));

        clock.advance(Duration::from_secs(1));
        let denied = limiter.allow("k").await;
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, start() + TimeDelta::seconds(10));

        // Only the first admission has aged out
        clock.advance(Duration::from_millis(5_001));
        let third = limiter.allow("k").await;
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset_at, start() + TimeDelta::seconds(14));
    }

    #[tokio::test]
    async fn test_prunes_out_of_order_timestamps() {
        let (clock, limiter) = limiter(2, Duration::from_secs(10));

        clock.set(start() + TimeDelta::seconds(100));
        assert!(limiter.allow("k").await.allowed);

        // Wall clock stepped backwards before the second admission
        clock.set(start() + TimeDelta::seconds(50));
        assert!(limiter.allow("k").await.allowed);

        // Only the admission at t=100 lies inside (95, 105]
        clock.set(start() + TimeDelta::seconds(105));
        let result = limiter.allow("k").await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.reset_at, start() + TimeDelta::seconds(110));
    }

    #[test]
    fn test_oldest_expiry_uses_earliest_timestamp() {
        let window = Duration::from_secs(10);
        let log: VecDeque<_> = [start() + TimeDelta::seconds(7), start() + TimeDelta::seconds(3)]
            .into_iter()
            .collect();

        assert_eq!(oldest_expiry(&log, start(), window), start() + TimeDelta::seconds(13));
        assert_eq!(
            oldest_expiry(&VecDeque::new(), start(), window),
            start() + TimeDelta::seconds(10)
        );
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (clock, limiter) = limiter(1, Duration::from_millis(50));

        assert!(limiter.allow("k").await.allowed);
        assert!(!limiter.allow("k").await.allowed);

        clock.advance(Duration::from_millis(60));
        assert!(limiter.allow("k").await.allowed);
    }

    #[tokio::test]
    async fn test_denied_requests_are_not_recorded() {
        let (clock, limiter) = limiter(1, Duration::from_secs(1));

        assert!(limiter.allow("k").await.allowed);
        clock.advance(Duration::from_millis(900));
        assert!(!limiter.allow("k").await.allowed);

        // The denial at 900ms must not push the next admission out
        clock.advance(Duration::from_millis(101));
        assert!(limiter.allow("k").await.allowed);
    }

    #[tokio::test]
    async fn test_override_applies_per_key() {
        let clock = Arc::new(FakeClock::new(start()));
        let quotas = Quotas::new(LimitConfig::new(5, Duration::from_secs(60)).unwrap())
            .with_override("vip", LimitConfig::new(1, Duration::from_secs(60)).unwrap());
        let limiter = SlidingWindowLimiter::new(clock, quotas);

        assert!(limiter.allow("vip").await.allowed);
        let denied = limiter.allow("vip").await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);

        assert_eq!(limiter.allow("other").await.limit, 5);
    }

    #[tokio::test]
    async fn test_evicts_idle_keys() {
        let clock = Arc::new(FakeClock::new(start()));
        let quotas = Quotas::new(LimitConfig::new(5, Duration::from_secs(10)).unwrap())
            .with_override("slow", LimitConfig::new(5, Duration::from_secs(60)).unwrap());
        let limiter = SlidingWindowLimiter::new(clock.clone(), quotas);

        limiter.allow("fast").await;
        limiter.allow("slow").await;

        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.evict_idle(), 0, "idle exactly one window is kept");

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.evict_idle(), 1);
        assert!(!limiter.is_tracked("fast"));
        assert!(limiter.is_tracked("slow"));
    }

    #[tokio::test]
    async fn test_background_reaper_evicts() {
        let clock = Arc::new(FakeClock::new(start()));
        let quotas = Quotas::new(LimitConfig::new(5, Duration::from_secs(1)).unwrap());
        let limiter =
            SlidingWindowLimiter::with_reap_interval(clock.clone(), quotas, Duration::from_millis(10));

        limiter.allow("k").await;
        assert_eq!(limiter.active_keys(), 1);

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.active_keys(), 0);

        limiter.shutdown().await;
    }
}
