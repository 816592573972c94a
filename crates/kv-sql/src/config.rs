//! Configuration types and environment parsing.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SIGNET_KV_SQL_URL` | SQL connection string | required |
//! | `SIGNET_KV_MAX_CONNECTIONS` | Pool size (1 for in-memory SQLite) | `8` |
//! | `SIGNET_KV_CACHE_NAME` | Read cache registry name | `kv` |
//! | `SIGNET_KV_CACHE_SIZE` | Read cache byte budget | `3000000` |
//! | `SIGNET_KV_CACHE_EXPIRY_SECS` | Read cache entry expiry, in seconds | `3600` |
//!
//! # Example
//!
//! ```rust
//! use signet_kv_sql::config::SqlKvConfig;
//! use std::env;
//!
//! unsafe {
//!     env::set_var("SIGNET_KV_SQL_URL", "sqlite::memory:");
//! }
//! let config = SqlKvConfig::from_env().unwrap();
//! assert_eq!(config.url, "sqlite::memory:");
//! assert_eq!(config.max_connections, 8);
//! # unsafe { env::remove_var("SIGNET_KV_SQL_URL"); }
//! ```

use signet_kv::CacheConfig;
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;

/// Environment variable name for the SQL connection URL.
pub const ENV_SQL_URL: &str = "SIGNET_KV_SQL_URL";

/// Environment variable name for the pool size.
pub const ENV_MAX_CONNECTIONS: &str = "SIGNET_KV_MAX_CONNECTIONS";

/// Environment variable name for the read cache name.
pub const ENV_CACHE_NAME: &str = "SIGNET_KV_CACHE_NAME";

/// Environment variable name for the read cache byte budget.
pub const ENV_CACHE_SIZE: &str = "SIGNET_KV_CACHE_SIZE";

/// Environment variable name for the read cache expiry, in seconds.
pub const ENV_CACHE_EXPIRY_SECS: &str = "SIGNET_KV_CACHE_EXPIRY_SECS";

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Configuration for a [`SqlDatabase`](crate::SqlDatabase).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlKvConfig {
    /// Connection URL (`postgres://…` or `sqlite:…`).
    pub url: String,
    /// Maximum pool size. Forced to 1 for in-memory SQLite.
    pub max_connections: u32,
    /// Read cache configuration.
    pub cache: CacheConfig,
}

impl SqlKvConfig {
    /// Create a configuration for `url` with default pool and cache
    /// settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cache: CacheConfig::default(),
        }
    }

    /// Set the maximum pool size.
    pub const fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the read cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if `SIGNET_KV_SQL_URL` is not
    /// set, or [`ConfigError::InvalidValue`] if a numeric variable cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let url = lookup(ENV_SQL_URL).ok_or(ConfigError::MissingEnvVar(ENV_SQL_URL))?;
        let defaults = CacheConfig::default();

        let max_connections = parse_or(&lookup, ENV_MAX_CONNECTIONS, DEFAULT_MAX_CONNECTIONS)?;
        let name = lookup(ENV_CACHE_NAME).unwrap_or(defaults.name);
        let size = parse_or(&lookup, ENV_CACHE_SIZE, defaults.size)?;
        let expiry = parse_or(&lookup, ENV_CACHE_EXPIRY_SECS, defaults.expiry.as_secs())
            .map(Duration::from_secs)?;

        Ok(Self { url, max_connections, cache: CacheConfig::new(name, size, expiry) })
    }
}

fn parse_or<F, T>(lookup: &F, env_var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(env_var) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::InvalidValue { env_var, value }),
        },
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value for {env_var}: {value}")]
    InvalidValue {
        /// The environment variable name.
        env_var: &'static str,
        /// The offending value.
        value: String,
    },
}
