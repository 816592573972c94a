//! The SQL key-value store facade.

use crate::{SqlBatch, SqlIterator, SqlKvError, SqlStore};
use bytes::Bytes;
use signet_kv::{
    CacheConfig, CacheRegistry, KeyValueReader, KeyValueStore, KeyValueWriter, KvError, KvResult,
    ReadCache, StorageKey,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::debug;

/// Property naming the connected database backend.
pub const STAT_BACKEND: &str = "sql.backend";

/// Property summarising the read cache counters.
pub const STAT_CACHE: &str = "sql.cache";

/// A [`KeyValueStore`] backed by a SQL database, with a read-through cache.
///
/// Reads of [`get`] go through a named [`ReadCache`]; `has` and iteration go
/// straight to the database. Writes are never reflected in the cache, so a
/// `get` following a write of the same key may return the previous value
/// until the cached entry expires.
///
/// Clones share the pool, the cache and the closed state.
///
/// [`get`]: KeyValueReader::get
#[derive(Debug, Clone)]
pub struct SqlDatabase {
    store: SqlStore,
    cache: Arc<ReadCache>,
    registry: CacheRegistry,
    closed: Arc<AtomicBool>,
}

impl SqlDatabase {
    /// Create a database over `store`, registering its read cache in
    /// `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::CacheNameInUse`] if the cache name is taken.
    pub fn new(store: SqlStore, cache: CacheConfig, registry: &CacheRegistry) -> KvResult<Self> {
        let cache = registry.register(cache)?;
        Ok(Self { store, cache, registry: registry.clone(), closed: Arc::default() })
    }

    /// The row store.
    pub const fn store(&self) -> &SqlStore {
        &self.store
    }

    /// The read cache.
    pub const fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    /// True once [`close`](KeyValueStore::close) has been called on any
    /// clone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.is_closed() { Err(KvError::Closed) } else { Ok(()) }
    }

    fn cache_summary(&self) -> String {
        let stats = self.cache.stats();
        format!(
            "hits={} loads={} coalesced={} evictions={} entries={} bytes={}",
            stats.hits,
            stats.loads,
            stats.coalesced,
            stats.evictions,
            self.cache.len(),
            self.cache.resident_bytes(),
        )
    }
}

impl KeyValueReader for SqlDatabase {
    async fn has(&self, key: &[u8]) -> KvResult<bool> {
        self.ensure_open()?;
        let key = StorageKey::from_native(key)?;
        self.store.has(&key).await
    }

    async fn get(&self, key: &[u8]) -> KvResult<Bytes> {
        self.ensure_open()?;
        let storage_key = StorageKey::from_native(key)?;
        self.cache.get_or_load(key, || self.store.get(&storage_key)).await
    }
}

impl KeyValueWriter for SqlDatabase {
    async fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.ensure_open()?;
        let key = StorageKey::from_native(key)?;

        let mut tx = self.store.begin().await?;
        self.store.put(&mut tx, &key, value).await?;
        tx.commit().await.map_err(|e| SqlKvError::from(e).into_transaction())
    }

    async fn delete(&self, key: &[u8]) -> KvResult<()> {
        self.ensure_open()?;
        let key = StorageKey::from_native(key)?;

        let mut tx = self.store.begin().await?;
        self.store.delete(&mut tx, &key).await?;
        tx.commit().await.map_err(|e| SqlKvError::from(e).into_transaction())
    }
}

impl KeyValueStore for SqlDatabase {
    type Batch = SqlBatch;
    type Iter = SqlIterator;

    fn new_batch(&self) -> Self::Batch {
        SqlBatch::new(self.store.clone(), self.closed.clone())
    }

    fn new_iterator(&self, start: &[u8], prefix: &[u8]) -> Self::Iter {
        SqlIterator::new(self.store.clone(), self.closed.clone(), start, prefix)
    }

    async fn stat(&self, property: &str) -> KvResult<String> {
        self.ensure_open()?;
        match property {
            STAT_BACKEND => Ok(self.store.backend_name().to_owned()),
            STAT_CACHE => Ok(self.cache_summary()),
            _ => Err(KvError::NotSupported("unknown stat property")),
        }
    }

    /// Deregister the cache and close the pool.
    ///
    /// Does not wait on batches with uncommitted work. Their connections are
    /// closed once the batch is next used, reset or dropped.
    async fn close(&self) -> KvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.registry.deregister(self.cache.name());
        self.store.close().await;
        debug!(target: "kv::sql", cache = %self.cache.name(), "database closed");
        Ok(())
    }
}
