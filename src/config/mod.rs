//! Service configuration, loaded from TOML.
//!
//! ```toml
//! [signing]
//! secret_env = "TRUSTGATE_SIGNING_SECRET"
//!
//! [retry]
//! max_attempts = 3
//! backoff_min_ms = 200
//! backoff_max_ms = 5000
//! retry_mutating = "with_idempotency_key"
//!
//! [remote_cache]
//! enabled = true
//! address = "127.0.0.1:6379"
//! db = 0
//! ttl_secs = 300
//! namespace = "meters:"
//!
//! [local_cache]
//! default_ttl_secs = 60
//! ```
//!
//! Every section and field is optional; missing values take the defaults
//! shown above, except `remote_cache.enabled` which defaults to `false`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::store::split_host_port;
use crate::client::{RetryMutating, RetryPolicy};
use crate::security::secret::{EnvSecret, SECRET_ENV_VAR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub remote_cache: RemoteCacheConfig,
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
}

impl TrustConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing.secret_env.is_empty() {
            return Err(ConfigError::Invalid("signing.secret_env must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.backoff_min_ms > self.retry.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "retry.backoff_min_ms must be <= retry.backoff_max_ms".into(),
            ));
        }
        if self.remote_cache.enabled && split_host_port(&self.remote_cache.address).is_none() {
            return Err(ConfigError::Invalid(format!(
                "remote_cache.address {:?} must be host:port",
                self.remote_cache.address
            )));
        }
        if self.remote_cache.db < 0 {
            return Err(ConfigError::Invalid("remote_cache.db must be >= 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// Environment variable holding the shared secret. Read on every call.
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
        }
    }
}

impl SigningConfig {
    pub fn secret_source(&self) -> EnvSecret {
        EnvSecret::new(self.secret_env.clone())
    }
}

fn default_secret_env() -> String {
    SECRET_ENV_VAR.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub retry_mutating: RetryMutating,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            retry_mutating: RetryMutating::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_min: Duration::from_millis(self.backoff_min_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            retry_mutating: self.retry_mutating,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

/// Where cached response snapshots live.
#[derive(Clone, Deserialize)]
pub struct RemoteCacheConfig {
    /// Disabled by default; a disabled cache passes every request through.
    #[serde(default)]
    pub enabled: bool,

    /// `host:port`; the port is required.
    #[serde(default = "default_remote_address")]
    pub address: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    /// Snapshot lifetime in seconds; 0 keeps snapshots until invalidated.
    #[serde(default = "default_remote_ttl_secs")]
    pub ttl_secs: u64,

    /// Prefix prepended to every key, e.g. `"meters:"`.
    #[serde(default)]
    pub namespace: String,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_remote_address(),
            username: None,
            password: None,
            db: 0,
            ttl_secs: default_remote_ttl_secs(),
            namespace: String::new(),
        }
    }
}

impl std::fmt::Debug for RemoteCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCacheConfig")
            .field("enabled", &self.enabled)
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("ttl_secs", &self.ttl_secs)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RemoteCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_remote_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_remote_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalCacheConfig {
    /// TTL for caches made by [`CacheManager::create_default_cache`]; 0 never
    /// expires.
    ///
    /// [`CacheManager::create_default_cache`]: crate::cache::CacheManager::create_default_cache
    #[serde(default = "default_local_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_local_ttl_secs(),
        }
    }
}

impl LocalCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_local_ttl_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = TrustConfig::from_toml_str("").unwrap();
        assert_eq!(config.signing.secret_env, SECRET_ENV_VAR);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(!config.remote_cache.enabled);
        assert_eq!(config.remote_cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.local_cache.default_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn full_document() {
        let config = TrustConfig::from_toml_str(
            r#"
            [signing]
            secret_env = "METERS_SECRET"

            [retry]
            max_attempts = 5
            backoff_min_ms = 50
            backoff_max_ms = 1000
            retry_mutating = "always"

            [remote_cache]
            enabled = true
            address = "cache.internal:6380"
            password = "hunter2"
            db = 2
            ttl_secs = 0
            namespace = "meters:"
            "#,
        )
        .unwrap();

        assert_eq!(config.signing.secret_source().var(), "METERS_SECRET");
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_min, Duration::from_millis(50));
        assert_eq!(policy.retry_mutating, RetryMutating::Always);
        assert_eq!(config.remote_cache.db, 2);
        assert_eq!(config.remote_cache.ttl(), Duration::ZERO);
        assert!(!format!("{:?}", config.remote_cache).contains("hunter2"));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = TrustConfig::from_toml_str("[retry]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_attempts")));
    }

    #[test]
    fn rejects_address_without_port() {
        let err = TrustConfig::from_toml_str("[remote_cache]\nenabled = true\naddress = \"cache\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("host:port")));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            TrustConfig::from_toml_str("[retry"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = TrustConfig::load("/nonexistent/trustgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
