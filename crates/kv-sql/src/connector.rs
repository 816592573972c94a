//! SQL key-value store connector.

use crate::{
    SqlDatabase, SqlKvError, SqlStore,
    config::{ConfigError, SqlKvConfig},
};
use signet_kv::{CacheRegistry, KvConnect, KvError};
use tracing::{debug, instrument};

/// Errors that can occur when initializing SQL connectors.
#[derive(Debug, thiserror::Error)]
pub enum SqlConnectorError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connecting to the database or creating the table failed.
    #[error("kv storage initialization failed: {0}")]
    Init(#[from] SqlKvError),

    /// The read cache could not be registered.
    #[error("kv cache registration failed: {0}")]
    Cache(#[from] KvError),
}

/// Connector for SQL key-value storage (PostgreSQL or SQLite).
///
/// The database type is detected from the URL:
/// - URLs starting with `postgres://` or `postgresql://` use PostgreSQL
/// - URLs starting with `sqlite:` use SQLite
///
/// # Example
///
/// ```ignore
/// use signet_kv::{CacheRegistry, KvConnect};
/// use signet_kv_sql::SqlConnector;
///
/// let registry = CacheRegistry::new();
///
/// // From the environment
/// let db = SqlConnector::from_env()?.connect(&registry).await?;
///
/// // SQLite
/// let db = SqlConnector::new("sqlite::memory:").connect(&registry).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqlConnector {
    config: SqlKvConfig,
}

impl SqlConnector {
    /// Create a new SQL connector with default pool and cache settings.
    ///
    /// The database type is detected from the URL prefix.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(SqlKvConfig::new(url))
    }

    /// Create a connector from a full configuration.
    pub const fn with_config(config: SqlKvConfig) -> Self {
        Self { config }
    }

    /// Create a connector from environment variables.
    ///
    /// See the [`config`](crate::config) module for the variables read.
    pub fn from_env() -> Result<Self, SqlConnectorError> {
        Ok(Self::with_config(SqlKvConfig::from_env()?))
    }

    /// Get a reference to the configuration.
    pub const fn config(&self) -> &SqlKvConfig {
        &self.config
    }

    /// Get a reference to the connection URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl KvConnect for SqlConnector {
    type Store = SqlDatabase;
    type Error = SqlConnectorError;

    #[instrument(skip_all, fields(cache = %self.config.cache.name))]
    async fn connect(&self, registry: &CacheRegistry) -> Result<Self::Store, Self::Error> {
        // Fail before opening a pool that would be discarded.
        if registry.contains(&self.config.cache.name) {
            return Err(KvError::CacheNameInUse(self.config.cache.name.clone()).into());
        }

        let store = SqlStore::connect(&self.config.url, self.config.max_connections).await?;
        let db = match SqlDatabase::new(store.clone(), self.config.cache.clone(), registry) {
            Ok(db) => db,
            Err(err) => {
                store.close().await;
                return Err(err.into());
            }
        };

        debug!(target: "kv::sql", backend = db.store().backend_name(), "connected");
        Ok(db)
    }
}
