//! Row-level access to the `blocks` relation.
//!
//! Supports both PostgreSQL and SQLite via [`sqlx::Any`]. The store detects
//! the database type at construction time and runs the appropriate
//! migration. Reads run directly against the pool; writes run inside a
//! transaction supplied by the caller and are never committed here.

use crate::{
    SqlKvError,
    columns::{COL_DATA, COL_KEY},
};
use bytes::Bytes;
use signet_kv::{KvError, KvResult, StorageKey};
use sqlx::{AnyPool, Row};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tracing::debug;

/// An open transaction on the store's pool.
pub type AnyTransaction = sqlx::Transaction<'static, sqlx::Any>;

/// Backend name reported by sqlx for PostgreSQL connections.
pub const POSTGRES: &str = "PostgreSQL";

/// Backend name reported by sqlx for SQLite connections.
pub const SQLITE: &str = "SQLite";

/// How long [`SqlStore::close`] waits for connections held by open batches.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Marks one pool connection as held by an open batch transaction. The
/// connection is released when this is dropped.
#[derive(Debug)]
pub(crate) struct BatchPin(Arc<AtomicU32>);

impl Drop for BatchPin {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// SQL-backed row store for content-addressed blocks.
///
/// # Example
///
/// ```no_run
/// # async fn example() {
/// use signet_kv_sql::SqlStore;
///
/// // SQLite (in-memory)
/// let store = SqlStore::connect("sqlite::memory:", 8).await.unwrap();
///
/// // PostgreSQL
/// let store = SqlStore::connect("postgres://localhost/signet", 8).await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: AnyPool,
    backend: String,
    pinned: Arc<AtomicU32>,
}

impl SqlStore {
    /// Create a new store from an existing [`AnyPool`].
    ///
    /// Auto-detects the database backend and creates the `blocks` table if
    /// it does not already exist. Callers must ensure
    /// [`sqlx::any::install_default_drivers`] has been called before
    /// constructing the pool.
    pub async fn new(pool: AnyPool) -> Result<Self, SqlKvError> {
        // Detect backend from a pooled connection.
        let conn = pool.acquire().await?;
        let backend = conn.backend_name().to_owned();
        drop(conn);

        let migration = match backend.as_str() {
            POSTGRES => include_str!("../migrations/001_initial_pg.sql"),
            SQLITE => include_str!("../migrations/001_initial.sql"),
            _ => return Err(SqlKvError::UnsupportedBackend(backend)),
        };
        sqlx::raw_sql(migration).execute(&pool).await?;

        debug!(target: "kv::sql", %backend, "blocks table ready");
        Ok(Self { pool, backend, pinned: Arc::default() })
    }

    /// Connect to a database URL and create the store.
    ///
    /// Installs the default sqlx drivers on the first call. The database
    /// type is inferred from the URL scheme (`sqlite:` or `postgres:`).
    ///
    /// For SQLite in-memory databases, the pool is limited to one connection
    /// so that all operations share the same database. While a batch holds
    /// that connection, other operations fail with
    /// [`SqlKvError::ConnectionsPinned`].
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, SqlKvError> {
        sqlx::any::install_default_drivers();
        let max_connections = if is_sqlite_memory(url) { 1 } else { max_connections.max(1) };
        let pool: AnyPool =
            sqlx::pool::PoolOptions::new().max_connections(max_connections).connect(url).await?;
        Self::new(pool).await
    }

    /// The database backend name, as reported by sqlx.
    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Number of connections currently held by open batches.
    pub fn pinned_connections(&self) -> u32 {
        self.pinned.load(Ordering::Acquire)
    }

    /// Fail rather than queue for a connection when open batches hold all of
    /// them, as those are released only by their owners.
    fn check_unpinned(&self) -> Result<(), SqlKvError> {
        let max = self.pool.options().get_max_connections();
        if self.pinned_connections() >= max {
            return Err(SqlKvError::ConnectionsPinned(max));
        }
        Ok(())
    }

    /// Fetch the value stored under `key`.
    ///
    /// Returns [`KvError::NotFound`] if there is no such row.
    pub async fn get(&self, key: &StorageKey) -> KvResult<Bytes> {
        self.check_unpinned()?;
        let row = sqlx::query("SELECT data FROM blocks WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlKvError::from)?
            .ok_or_else(|| KvError::NotFound(key.to_string()))?;
        let data: Vec<u8> = row.try_get(COL_DATA).map_err(SqlKvError::from)?;
        Ok(data.into())
    }

    /// Check whether a row exists for `key`.
    pub async fn has(&self, key: &StorageKey) -> KvResult<bool> {
        self.check_unpinned()?;
        let row = sqlx::query("SELECT 1 AS present FROM blocks WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlKvError::from)?;
        Ok(row.is_some())
    }

    /// Insert or replace the row for `key` within `tx`.
    pub async fn put(
        &self,
        tx: &mut AnyTransaction,
        key: &StorageKey,
        value: &[u8],
    ) -> KvResult<()> {
        sqlx::query(
            "INSERT INTO blocks (key, data) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET data = excluded.data",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&mut **tx)
        .await
        .map_err(|e| SqlKvError::from(e).into_transaction())?;
        Ok(())
    }

    /// Delete the row for `key` within `tx`. Deleting an absent row is not
    /// an error.
    pub async fn delete(&self, tx: &mut AnyTransaction, key: &StorageKey) -> KvResult<()> {
        sqlx::query("DELETE FROM blocks WHERE key = $1")
            .bind(key.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| SqlKvError::from(e).into_transaction())?;
        Ok(())
    }

    /// Begin a transaction on the pool.
    pub async fn begin(&self) -> KvResult<AnyTransaction> {
        self.check_unpinned()?;
        self.pool.begin().await.map_err(|e| SqlKvError::from(e).into_transaction())
    }

    /// Begin a transaction that stays open for the life of a batch.
    pub(crate) async fn begin_pinned(&self) -> KvResult<(AnyTransaction, BatchPin)> {
        let tx = self.begin().await?;
        self.pinned.fetch_add(1, Ordering::AcqRel);
        Ok((tx, BatchPin(self.pinned.clone())))
    }

    /// Read every row as raw `(storage key, value)` pairs, in no particular
    /// order.
    pub async fn scan(&self) -> KvResult<Vec<(String, Bytes)>> {
        self.check_unpinned()?;
        let rows = sqlx::query("SELECT key, data FROM blocks")
            .fetch_all(&self.pool)
            .await
            .map_err(SqlKvError::from)?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get(COL_KEY)?;
                let data: Vec<u8> = row.try_get(COL_DATA)?;
                Ok((key, Bytes::from(data)))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| SqlKvError::from(e).into())
    }

    /// Close the pool. Idempotent.
    ///
    /// New acquires fail immediately and idle connections are closed.
    /// Connections held by open batches are closed when those batches are
    /// dropped or reset; this waits for them only briefly.
    pub async fn close(&self) {
        let pinned = self.pinned_connections();
        if pinned == 0 {
            self.pool.close().await;
        } else if tokio::time::timeout(CLOSE_GRACE, self.pool.close()).await.is_err() {
            debug!(target: "kv::sql", pinned, "pool closed with batch connections outstanding");
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// True if `url` names an in-memory SQLite database.
fn is_sqlite_memory(url: &str) -> bool {
    url.starts_with("sqlite:") && (url.contains(":memory:") || url.contains("mode=memory"))
}
