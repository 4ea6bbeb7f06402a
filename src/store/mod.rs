//! Counter stores backing the fixed window limiter
//!
//! A counter store exposes a single atomic "increment and ensure expiry"
//! operation. Two backends are provided:
//!
//! - **Memory**: process-local map with a background expiry sweep
//! - **Redis**: shared counters updated through one Lua script, so every
//!   service instance sees the same window counts

pub mod lua_scripts;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};

/// Key to integer counter with atomic increment-and-expire
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return `(new_value, ttl_remaining)`
    ///
    /// The expiry is set to `ttl` only when the counter is created; later
    /// increments in the same lifetime never extend it.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, Duration)>;

    /// Release connections and background work
    async fn close(&self) -> Result<()>;
}

/// Counter store backend selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::error::QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(crate::error::QuotaError::Config(format!(
                "Invalid counter store {:?} (expected: memory, redis)",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(" Redis ".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert!("etcd".parse::<StoreBackend>().is_err());
        assert_eq!(StoreBackend::default(), StoreBackend::Memory);
    }
}
