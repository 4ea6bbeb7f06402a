use super::clock::Clock;
use super::fixed_window::FixedWindowLimiter;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use super::types::{Algorithm, RateLimitResult, RateLimiter};
use crate::config::RateLimitSettings;
use crate::error::Result;
use crate::store::{CounterStore, MemoryStore, RedisStore, StoreBackend};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Rate limiter service wiring the configured algorithm to its store
pub struct RateLimiterService {
    limiter: Arc<dyn RateLimiter>,
    /// Clock the limiter decides with
    clock: Arc<dyn Clock>,
}

impl RateLimiterService {
    /// Wrap an already constructed limiter and the clock it reads
    pub fn new(limiter: Arc<dyn RateLimiter>, clock: Arc<dyn Clock>) -> Self {
        Self { limiter, clock }
    }

    /// Build the limiter selected by `settings`
    ///
    /// A Redis store is connected and pinged here, so an unreachable backend
    /// fails start-up instead of the first request.
    pub async fn from_config(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        let quotas = settings.quotas()?;

        info!(
            algorithm = %settings.algorithm,
            limit = quotas.default_config().limit(),
            window_secs = quotas.default_config().window().as_secs(),
            overrides = quotas.overrides().len(),
            "Initializing rate limiter"
        );

        let service = match settings.algorithm {
            Algorithm::FixedWindow => {
                let store = build_store(settings, clock.clone()).await?;
                let limiter = FixedWindowLimiter::new(store, clock.clone(), quotas);
                Self::new(Arc::new(limiter), clock)
            }
            Algorithm::SlidingWindow => {
                warn_unused_store(settings);
                let limiter = SlidingWindowLimiter::with_reap_interval(
                    clock.clone(),
                    quotas,
                    settings.reap_interval(),
                );
                Self::new(Arc::new(limiter), clock)
            }
            Algorithm::TokenBucket => {
                warn_unused_store(settings);
                let limiter = TokenBucketLimiter::with_reap_interval(
                    clock.clone(),
                    quotas,
                    settings.reap_interval(),
                );
                Self::new(Arc::new(limiter), clock)
            }
        };

        Ok(service)
    }

    /// Check if a request is allowed based on rate limiting
    pub async fn check(&self, api_key: &str) -> RateLimitResult {
        self.limiter.allow(api_key).await
    }

    pub fn algorithm(&self) -> Algorithm {
        self.limiter.algorithm()
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Current instant on the limiter's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stop background sweeps and release the counter store
    pub async fn shutdown(&self) {
        self.limiter.shutdown().await;
        info!("Rate limiter stopped");
    }
}

async fn build_store(
    settings: &RateLimitSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match settings.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory counter store");
            Arc::new(MemoryStore::with_cleanup_interval(
                clock,
                settings.store.cleanup_interval(),
            ))
        }
        StoreBackend::Redis => {
            info!("Using Redis counter store");
            Arc::new(RedisStore::connect(&settings.store.redis.to_store_config()).await?)
        }
    };

    Ok(store)
}

fn warn_unused_store(settings: &RateLimitSettings) {
    if settings.store.backend == StoreBackend::Redis {
        warn!(
            algorithm = %settings.algorithm,
            "Redis counter store only applies to fixed_window; limiting in process"
        );
    }
}
