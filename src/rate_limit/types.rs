use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::clock::elapsed;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter per aligned, non-overlapping window
    FixedWindow,
    /// Exact log of admissions over the trailing window
    SlidingWindow,
    /// Continuously refilled bucket
    TokenBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            _ => Err(QuotaError::Config(format!(
                "Invalid rate limit algorithm {:?} (expected: fixed_window, sliding_window, token_bucket)",
                s
            ))),
        }
    }
}

/// Quota applied to a key: at most `limit` operations per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    limit: u32,
    window: Duration,
}

impl LimitConfig {
    /// Create a quota, rejecting a zero limit or an empty window
    pub fn new(limit: u32, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(QuotaError::Config("Rate limit must be > 0".to_string()));
        }
        if window.is_zero() {
            return Err(QuotaError::Config(
                "Rate limit window must be > 0".to_string(),
            ));
        }

        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Default quota plus per-key overrides
#[derive(Debug, Clone)]
pub struct Quotas {
    default: LimitConfig,
    overrides: HashMap<String, LimitConfig>,
}

impl Quotas {
    pub fn new(default: LimitConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(default: LimitConfig, overrides: HashMap<String, LimitConfig>) -> Self {
        Self { default, overrides }
    }

    /// Add or replace the override for a single key
    pub fn with_override(mut self, key: impl Into<String>, config: LimitConfig) -> Self {
        self.overrides.insert(key.into(), config);
        self
    }

    /// Resolve the quota for a key; overrides take precedence over the default
    pub fn config_for(&self, key: &str) -> LimitConfig {
        self.overrides.get(key).copied().unwrap_or(self.default)
    }

    pub fn default_config(&self) -> LimitConfig {
        self.default
    }

    pub fn overrides(&self) -> &HashMap<String, LimitConfig> {
        &self.overrides
    }
}

/// Outcome of a single admission decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining admissions before the quota is exhausted
    pub remaining: u32,
    /// When the quota is expected to improve
    pub reset_at: DateTime<Utc>,
    /// Total limit applied to the key
    pub limit: u32,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(remaining: u32, limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: remaining.min(limit),
            reset_at,
            limit,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            limit,
        }
    }

    /// Time left until `reset_at`, zero if it has already passed
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        elapsed(now, self.reset_at)
    }
}

/// Admission control over per-key quotas
///
/// Implementations must be safe to call concurrently for arbitrary keys and
/// always produce a decision; backend failures are absorbed inside.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether one more operation for `key` may proceed
    async fn allow(&self, key: &str) -> RateLimitResult;

    /// Algorithm implemented by this limiter
    fn algorithm(&self) -> Algorithm;

    /// Stop background work owned by the limiter
    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(limit: u32) -> LimitConfig {
        LimitConfig::new(limit, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "fixed_window".parse::<Algorithm>().unwrap(),
            Algorithm::FixedWindow
        );
        assert_eq!(
            "  Sliding-Window ".parse::<Algorithm>().unwrap(),
            Algorithm::SlidingWindow
        );
        assert_eq!(
            "TOKEN_BUCKET".parse::<Algorithm>().unwrap(),
            Algorithm::TokenBucket
        );
        assert!("leaky_bucket".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::TokenBucket.to_string(), "token_bucket");
    }

    #[test]
    fn test_limit_config_validation() {
        assert!(LimitConfig::new(0, Duration::from_secs(1)).is_err());
        assert!(LimitConfig::new(1, Duration::ZERO).is_err());

        let config = LimitConfig::new(5, Duration::from_millis(50)).unwrap();
        assert_eq!(config.limit(), 5);
        assert_eq!(config.window(), Duration::from_millis(50));
    }

    #[test]
    fn test_override_takes_precedence() {
        let quotas = Quotas::new(minute(10)).with_override("vip", minute(3));

        assert_eq!(quotas.config_for("vip").limit(), 3);
        assert_eq!(quotas.config_for("regular").limit(), 10);
        assert_eq!(quotas.default_config().limit(), 10);
        assert_eq!(quotas.overrides().len(), 1);
    }

    #[test]
    fn test_rate_limit_result() {
        let reset = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();

        let allowed = RateLimitResult::allowed(50, 100, reset);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 50);
        assert_eq!(allowed.limit, 100);
        assert_eq!(allowed.retry_after(now), Duration::from_secs(30));

        let denied = RateLimitResult::denied(100, reset);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after(reset), Duration::ZERO);

        let clamped = RateLimitResult::allowed(7, 5, reset);
        assert_eq!(clamped.remaining, 5);
    }
}
