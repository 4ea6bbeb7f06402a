use super::lua_scripts::INCR_WITH_TTL_SCRIPT;
use super::CounterStore;
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::ConnectionManager, IntoConnectionInfo, Script};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

const DEFAULT_ADDRESS: &str = "localhost:6379";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection settings for the Redis counter store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// `host:port` or a full `redis://` URL
    pub address: String,
    pub password: Option<SecretString>,
    pub db: i64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            password: None,
            db: 0,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RedisStoreConfig {
    fn url(&self) -> String {
        let address = if self.address.trim().is_empty() {
            DEFAULT_ADDRESS
        } else {
            self.address.trim()
        };

        if address.starts_with("redis://") || address.starts_with("rediss://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        }
    }

    /// Upper bound for one command: the request is written, then the reply read
    fn command_timeout(&self) -> Duration {
        self.read_timeout.saturating_add(self.write_timeout)
    }
}

/// Redis-backed distributed counter store
pub struct RedisStore {
    /// Redis connection manager, `None` once closed
    connection: Mutex<Option<ConnectionManager>>,
    script: Script,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect and verify liveness with a PING
    ///
    /// Fails if the server cannot be reached within the connect timeout, so
    /// misconfiguration surfaces at start-up.
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let url = config.url();
        let mut info = url.clone().into_connection_info()?;
        info.redis.db = config.db;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.expose_secret().clone());
        }

        let client = redis::Client::open(info)?;
        let mut connection = bounded("connect", config.connect_timeout, async {
            ConnectionManager::new(client)
                .await
                .map_err(QuotaError::from)
        })
        .await?;

        bounded("PING", config.connect_timeout, ping(&mut connection)).await?;

        info!(url = %url, db = config.db, "Connected to Redis counter store");

        Ok(Self {
            connection: Mutex::new(Some(connection)),
            script: Script::new(INCR_WITH_TTL_SCRIPT),
            command_timeout: config.command_timeout(),
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection()?;
        bounded("PING", self.command_timeout, ping(&mut connection)).await
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection.lock().clone().ok_or(QuotaError::StoreClosed)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<(i64, Duration)> {
        let mut connection = self.connection()?;
        let ttl_ms = ttl_millis(ttl);

        let reply = bounded(
            "INCR",
            self.command_timeout,
            async {
                self.script
                    .key(key)
                    .arg(ttl_ms)
                    .invoke_async::<_, Vec<i64>>(&mut connection)
                    .await
                    .map_err(QuotaError::from)
            },
        )
        .await?;

        let (value, ttl_remaining) = parse_reply(&reply)?;
        debug!(
            "Counter {} incremented to {} (ttl {:?})",
            key, value, ttl_remaining
        );

        Ok((value, ttl_remaining))
    }

    async fn close(&self) -> Result<()> {
        if self.connection.lock().take().is_some() {
            info!("Closed Redis counter store");
        }
        Ok(())
    }
}

async fn ping(connection: &mut ConnectionManager) -> Result<()> {
    redis::cmd("PING")
        .query_async::<_, ()>(connection)
        .await
        .map_err(QuotaError::from)
}

/// Run a store operation under a deadline
async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation, timeout_ms = limit.as_millis() as u64, "Redis operation timed out");
            Err(QuotaError::StoreTimeout {
                operation,
                timeout: limit,
            })
        }
    }
}

/// TTL argument for the script; `PEXPIRE key 0` deletes the key, so never send 0
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Decode `[value, pttl_ms]`; a non-positive TTL means no time remaining
fn parse_reply(reply: &[i64]) -> Result<(i64, Duration)> {
    match reply {
        [value, ttl_ms] => {
            let ttl_remaining = if *ttl_ms <= 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(*ttl_ms as u64)
            };
            Ok((*value, ttl_remaining))
        }
        other => Err(QuotaError::MalformedReply(format!(
            "expected [value, ttl], got {} elements",
            other.len()
        ))),
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.lock().is_some())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}
