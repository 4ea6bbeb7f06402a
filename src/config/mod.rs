use crate::error::{QuotaError, Result};
use crate::rate_limit::types::{Algorithm, LimitConfig, Quotas};
use crate::store::{RedisStoreConfig, StoreBackend};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Quota as written in configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitSettings {
    /// Maximum number of requests allowed
    pub limit: u32,
    /// Time window for the limit (in seconds)
    pub window_secs: u64,
}

impl LimitSettings {
    pub fn to_limit_config(&self) -> Result<LimitConfig> {
        LimitConfig::new(self.limit, Duration::from_secs(self.window_secs))
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Algorithm used for every key
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,
    /// Quota applied to keys without an override
    #[serde(default = "default_limit")]
    pub default: LimitSettings,
    /// Per-key quotas that replace the default
    #[serde(default)]
    pub overrides: HashMap<String, LimitSettings>,
    /// Seconds between idle-key sweeps
    #[serde(default = "default_interval_secs")]
    pub reap_interval_secs: u64,
    /// Counter store used by the fixed window algorithm
    #[serde(default)]
    pub store: StoreSettings,
}

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Seconds between expired-counter sweeps (memory backend)
    #[serde(default = "default_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default)]
    pub redis: RedisSettings,
}

/// Redis configuration for the counter store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis address (`host:port`) or URL
    #[serde(default = "default_redis_address")]
    pub address: String,
    /// Redis password
    #[serde(
        default,
        deserialize_with = "deserialize_optional_secret",
        serialize_with = "serialize_redacted"
    )]
    pub password: Option<SecretString>,
    /// Logical database index
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_algorithm() -> Algorithm {
    Algorithm::FixedWindow
}

fn default_limit() -> LimitSettings {
    LimitSettings {
        limit: 10,
        window_secs: 60,
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_redis_address() -> String {
    "localhost:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(Secret::new))
}

fn serialize_redacted<S>(
    value: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            default: default_limit(),
            overrides: HashMap::new(),
            reap_interval_secs: default_interval_secs(),
            store: StoreSettings::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            cleanup_interval_secs: default_interval_secs(),
            redis: RedisSettings::default(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            password: None,
            db: 0,
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

impl RateLimitSettings {
    /// Build the default quota plus overrides
    pub fn quotas(&self) -> Result<Quotas> {
        let default = self.default.to_limit_config()?;
        let overrides = self
            .overrides
            .iter()
            .map(|(key, limit)| {
                limit
                    .to_limit_config()
                    .map(|config| (key.clone(), config))
                    .map_err(|e| QuotaError::Config(format!("Override for key {:?}: {}", key, e)))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Quotas::with_overrides(default, overrides))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl StoreSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl RedisSettings {
    pub fn to_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            address: self.address.clone(),
            password: self.password.clone(),
            db: self.db,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QuotaError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path` if it exists, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Self::from_file(path)?
        } else {
            info!(
                "No config file at {}, using defaults and environment",
                path.display()
            );
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Apply `RATE_LIMIT_STRATEGY`, `DEFAULT_LIMIT`, `DEFAULT_WINDOW_SECONDS`,
    /// `COUNTER_STORE` and `REDIS_*` overrides from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let settings = &mut self.rate_limit;

        if let Some(raw) = var("RATE_LIMIT_STRATEGY") {
            settings.algorithm = raw.parse()?;
            debug!("RATE_LIMIT_STRATEGY={}", settings.algorithm);
        }
        if let Some(raw) = var("DEFAULT_LIMIT") {
            settings.default.limit = parse_number("DEFAULT_LIMIT", &raw)?;
        }
        if let Some(raw) = var("DEFAULT_WINDOW_SECONDS") {
            settings.default.window_secs = parse_number("DEFAULT_WINDOW_SECONDS", &raw)?;
        }
        if let Some(raw) = var("COUNTER_STORE") {
            settings.store.backend = raw.parse()?;
        }
        if let Some(address) = var("REDIS_ADDR") {
            settings.store.redis.address = address;
        }
        if let Some(password) = var("REDIS_PASSWORD") {
            settings.store.redis.password = Some(Secret::new(password));
        }
        if let Some(raw) = var("REDIS_DB") {
            settings.store.redis.db = parse_number("REDIS_DB", &raw)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let settings = &self.rate_limit;

        if settings.default.limit == 0 {
            return Err(QuotaError::Config(format!(
                "DEFAULT_LIMIT must be > 0 (got {})",
                settings.default.limit
            )));
        }
        if settings.default.window_secs == 0 {
            return Err(QuotaError::Config(format!(
                "DEFAULT_WINDOW_SECONDS must be > 0 (got {})",
                settings.default.window_secs
            )));
        }

        settings.quotas()?;

        if settings.reap_interval_secs == 0 {
            return Err(QuotaError::Config(
                "Reap interval must be > 0".to_string(),
            ));
        }
        if settings.store.cleanup_interval_secs == 0 {
            return Err(QuotaError::Config(
                "Counter store cleanup interval must be > 0".to_string(),
            ));
        }

        if settings.store.backend == StoreBackend::Redis {
            let redis = &settings.store.redis;
            if redis.address.trim().is_empty() {
                return Err(QuotaError::Config(
                    "Redis address cannot be empty".to_string(),
                ));
            }
            if redis.db < 0 {
                return Err(QuotaError::Config(format!(
                    "Redis database must be >= 0 (got {})",
                    redis.db
                )));
            }
            if redis.connect_timeout_ms == 0
                || redis.read_timeout_ms == 0
                || redis.write_timeout_ms == 0
            {
                return Err(QuotaError::Config(
                    "Redis timeouts must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Whether a Redis password is configured, without exposing it
    pub fn has_redis_password(&self) -> bool {
        self.rate_limit
            .store
            .redis
            .password
            .as_ref()
            .is_some_and(|p| !p.expose_secret().is_empty())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| QuotaError::Config(format!("{} must be an integer (got {:?})", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
rate_limit:
  algorithm: sliding_window
  default:
    limit: 100
    window_secs: 60
  overrides:
    vip:
      limit: 3
      window_secs: 60
  store:
    backend: redis
    redis:
      address: "cache:6379"
      password: "s3cret"
      db: 2
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.rate_limit.algorithm, Algorithm::SlidingWindow);
        assert_eq!(config.rate_limit.default.limit, 100);
        assert_eq!(config.rate_limit.store.backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit.store.redis.db, 2);
        assert!(config.has_redis_password());
        assert!(config.validate().is_ok());

        let quotas = config.rate_limit.quotas().unwrap();
        assert_eq!(quotas.config_for("vip").limit(), 3);
        assert_eq!(quotas.config_for("anyone").limit(), 100);

        let store = config.rate_limit.store.redis.to_store_config();
        assert_eq!(store.address, "cache:6379");
        assert_eq!(store.read_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::from_yaml("{}").unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.algorithm, Algorithm::FixedWindow);
        assert_eq!(config.rate_limit.default.limit, 10);
        assert_eq!(config.rate_limit.default.window_secs, 60);
        assert_eq!(config.rate_limit.store.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limit.reap_interval(), Duration::from_secs(60));
        assert!(!config.has_redis_password());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("RATE_LIMIT_STRATEGY", " Token_Bucket "),
                ("DEFAULT_LIMIT", "25"),
                ("DEFAULT_WINDOW_SECONDS", "30"),
                ("COUNTER_STORE", "redis"),
                ("REDIS_ADDR", "10.0.0.5:6379"),
                ("REDIS_PASSWORD", "pw"),
                ("REDIS_DB", "3"),
            ]))
            .unwrap();

        let settings = &config.rate_limit;
        assert_eq!(settings.algorithm, Algorithm::TokenBucket);
        assert_eq!(settings.default.limit, 25);
        assert_eq!(settings.default.window_secs, 30);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
        assert_eq!(settings.store.redis.address, "10.0.0.5:6379");
        assert_eq!(settings.store.redis.db, 3);
        assert!(config.has_redis_password());
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[("RATE_LIMIT_STRATEGY", ""), ("DEFAULT_LIMIT", "  ")]))
            .unwrap();

        assert_eq!(config.rate_limit.algorithm, Algorithm::FixedWindow);
        assert_eq!(config.rate_limit.default.limit, 10);
    }

    #[test]
    fn test_invalid_env_values_are_rejected() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_env_overrides(env(&[("RATE_LIMIT_STRATEGY", "leaky_bucket")]))
            .is_err());
        assert!(config
            .apply_env_overrides(env(&[("DEFAULT_LIMIT", "ten")]))
            .is_err());
        assert!(config
            .apply_env_overrides(env(&[("DEFAULT_WINDOW_SECONDS", "-5")]))
            .is_err());
        assert!(config
            .apply_env_overrides(env(&[("COUNTER_STORE", "etcd")]))
            .is_err());
    }

    #[test]
    fn test_validate_zero_limit() {
        let mut config = AppConfig::default();
        config.rate_limit.default.limit = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DEFAULT_LIMIT must be > 0"));
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = AppConfig::default();
        config.rate_limit.default.window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_override() {
        let mut config = AppConfig::default();
        config.rate_limit.overrides.insert(
            "broken".to_string(),
            LimitSettings {
                limit: 0,
                window_secs: 10,
            },
        );

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_validate_redis_settings() {
        let mut config = AppConfig::default();
        config.rate_limit.store.backend = StoreBackend::Redis;
        config.rate_limit.store.redis.read_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.rate_limit.store.redis.read_timeout_ms = 100;
        config.rate_limit.store.redis.db = -1;
        assert!(config.validate().is_err());

        config.rate_limit.store.redis.db = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_is_redacted_when_serialized() {
        let mut config = AppConfig::default();
        config.rate_limit.store.redis.password = Some(Secret::new("hunter2".to_string()));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("hunter2"));
        assert!(yaml.contains("[REDACTED]"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rate_limit:\n  algorithm: token_bucket\n  default:\n    limit: 7\n    window_secs: 5"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rate_limit.algorithm, Algorithm::TokenBucket);
        assert_eq!(config.rate_limit.default.limit, 7);

        assert!(AppConfig::from_file("/nonexistent/quotaguard.yaml").is_err());
    }
}
