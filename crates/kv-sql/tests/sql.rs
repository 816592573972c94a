//! Behaviour of the SQL store beyond the shared conformance suite: cache
//! staleness, registry ownership, transaction isolation and inspection.

#![cfg(feature = "sqlite")]

use signet_kv::{
    CacheConfig, CacheRegistry, KeyValueReader, KeyValueStore, KeyValueWriter, KvBatch, KvConnect,
    KvError, KvIterator, conformance::make_header_pair,
};
use signet_kv_sql::{
    STAT_BACKEND, STAT_CACHE, SqlConnector, SqlConnectorError, SqlDatabase, SqlStore,
    config::SqlKvConfig,
};
use std::time::{Duration, Instant};

async fn in_memory(registry: &CacheRegistry, cache: CacheConfig) -> SqlDatabase {
    let config = SqlKvConfig::new("sqlite::memory:").with_cache(cache);
    SqlConnector::with_config(config).connect(registry).await.unwrap()
}

#[tokio::test]
async fn cached_reads_are_stale_until_expiry() {
    let registry = CacheRegistry::new();
    let cache = CacheConfig::default().with_name("stale").with_expiry(Duration::from_secs(1));
    let db = in_memory(&registry, cache).await;
    let ((key, old), (_, new)) = make_header_pair(1_000);

    db.put(key.as_slice(), &old).await.unwrap();
    assert_eq!(db.get(key.as_slice()).await.unwrap(), old);

    // Overwrites are not reflected in the cache.
    db.put(key.as_slice(), &new).await.unwrap();
    assert_eq!(db.get(key.as_slice()).await.unwrap(), old);

    // Neither are deletes, though `has` bypasses the cache.
    db.delete(key.as_slice()).await.unwrap();
    assert_eq!(db.get(key.as_slice()).await.unwrap(), old);
    assert!(!db.has(key.as_slice()).await.unwrap());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(db.get(key.as_slice()).await.unwrap_err().is_not_found());

    let stats = db.cache().stats();
    assert_eq!(stats.loads, 2);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn not_found_is_not_cached() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key, value), _) = make_header_pair(1_010);

    assert!(db.get(key.as_slice()).await.unwrap_err().is_not_found());
    db.put(key.as_slice(), &value).await.unwrap();
    assert_eq!(db.get(key.as_slice()).await.unwrap(), value);
    assert_eq!(db.cache().stats().loads, 2);
}

#[tokio::test]
async fn concurrent_gets_share_one_load() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key, value), _) = make_header_pair(1_020);
    db.put(key.as_slice(), &value).await.unwrap();

    // Hold the only connection so the first load waits on the pool.
    let conn = db.store().pool().acquire().await.unwrap();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.get(key.as_slice()).await })
        })
        .collect();
    while db.cache().stats().loads + db.cache().stats().coalesced < 8 {
        tokio::task::yield_now().await;
    }
    drop(conn);

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), value);
    }
    let stats = db.cache().stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.coalesced, 7);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn registry_names_are_exclusive_until_close() {
    let registry = CacheRegistry::new();
    let first = in_memory(&registry, CacheConfig::default()).await;
    assert!(registry.contains("kv"));

    let err = SqlConnector::new("sqlite::memory:").connect(&registry).await.unwrap_err();
    assert!(matches!(
        err,
        SqlConnectorError::Cache(KvError::CacheNameInUse(ref name)) if name == "kv"
    ));

    // Other names are unaffected.
    let other = in_memory(&registry, CacheConfig::default().with_name("other")).await;
    assert_eq!(registry.len(), 2);

    // Closing through a clone closes every handle.
    first.clone().close().await.unwrap();
    assert!(first.is_closed());
    assert!(!registry.contains("kv"));
    assert!(matches!(first.stat(STAT_BACKEND).await, Err(KvError::Closed)));

    // A second close must not deregister a cache that reused the name.
    let second = in_memory(&registry, CacheConfig::default()).await;
    first.close().await.unwrap();
    assert!(registry.contains("kv"));

    let ((key, value), _) = make_header_pair(1_030);
    second.put(key.as_slice(), &value).await.unwrap();
    assert_eq!(second.get(key.as_slice()).await.unwrap(), value);
    assert!(!other.has(key.as_slice()).await.unwrap());
}

#[tokio::test]
async fn uncommitted_batches_are_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("blocks.db").display());
    let config = SqlKvConfig::new(url)
        .with_max_connections(4)
        .with_cache(CacheConfig::default().with_expiry(Duration::ZERO));
    let db = SqlConnector::with_config(config).connect(&CacheRegistry::new()).await.unwrap();

    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(1_040);

    let mut batch = db.new_batch();
    batch.put(key_a.as_slice(), &value_a).await.unwrap();
    batch.put(key_b.as_slice(), &value_b).await.unwrap();

    // Readers on other connections see nothing until commit.
    assert!(!db.has(key_a.as_slice()).await.unwrap());
    assert!(db.get(key_b.as_slice()).await.unwrap_err().is_not_found());

    batch.write().await.unwrap();
    assert!(db.has(key_a.as_slice()).await.unwrap());
    assert_eq!(db.get(key_b.as_slice()).await.unwrap(), value_b);

    // A reset rolls the transaction back.
    batch.reset();
    batch.delete(key_a.as_slice()).await.unwrap();
    batch.reset();
    assert!(db.has(key_a.as_slice()).await.unwrap());

    db.close().await.unwrap();
}

#[tokio::test]
async fn failed_statement_poisons_batch_until_reset() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(1_045);

    sqlx::query("DROP TABLE blocks").execute(db.store().pool()).await.unwrap();

    let mut batch = db.new_batch();
    let err = batch.put(key_a.as_slice(), &value_a).await.unwrap_err();
    assert!(matches!(err, KvError::Transaction(_)), "got {err}");
    assert!(batch.is_finished());
    assert_eq!(batch.value_size(), 0);

    assert!(matches!(batch.put(key_b.as_slice(), &value_b).await, Err(KvError::BatchFinished)));
    assert!(matches!(batch.delete(key_b.as_slice()).await, Err(KvError::BatchFinished)));

    // Recreate the table, then the reset batch is usable again.
    SqlStore::new(db.store().pool().clone()).await.unwrap();
    batch.reset();
    batch.put(key_a.as_slice(), &value_a).await.unwrap();
    batch.put(key_b.as_slice(), &value_b).await.unwrap();
    batch.write().await.unwrap();

    assert!(db.has(key_a.as_slice()).await.unwrap());
    assert_eq!(db.get(key_b.as_slice()).await.unwrap(), value_b);
}

#[tokio::test]
async fn open_batch_on_single_connection_fails_fast() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((committed, value), (pending, other)) = make_header_pair(1_047);
    db.put(committed.as_slice(), &value).await.unwrap();

    let mut batch = db.new_batch();
    batch.put(pending.as_slice(), &other).await.unwrap();
    assert_eq!(db.store().pinned_connections(), 1);

    let started = Instant::now();
    let err = db.has(committed.as_slice()).await.unwrap_err();
    assert!(matches!(err, KvError::Backend(_)));
    assert!(err.to_string().contains("held by open batches"), "got {err}");
    assert!(matches!(db.get(committed.as_slice()).await, Err(KvError::Backend(_))));
    assert!(matches!(db.put(committed.as_slice(), &value).await, Err(KvError::Backend(_))));

    let mut second = db.new_batch();
    assert!(second.put(committed.as_slice(), &value).await.is_err());
    assert!(!second.is_open());
    assert!(started.elapsed() < Duration::from_secs(5));

    // Committing releases the connection.
    batch.write().await.unwrap();
    assert_eq!(db.store().pinned_connections(), 0);
    assert!(db.has(committed.as_slice()).await.unwrap());
    assert!(db.has(pending.as_slice()).await.unwrap());
}

#[tokio::test]
async fn close_does_not_wait_for_open_batches() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(1_048);

    let mut batch = db.new_batch();
    batch.put(key_a.as_slice(), &value_a).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), db.close()).await.unwrap().unwrap();
    assert!(db.is_closed());
    assert!(db.store().is_closed());
    assert!(!registry.contains("kv"));

    // The batch gives up its transaction once it sees the closed database.
    assert!(matches!(batch.put(key_b.as_slice(), &value_b).await, Err(KvError::Closed)));
    assert!(!batch.is_open());
    assert_eq!(db.store().pinned_connections(), 0);

    batch.reset();
    db.close().await.unwrap();
}

#[tokio::test]
async fn iterator_skips_foreign_rows() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(1_050);

    db.put(key_a.as_slice(), &value_a).await.unwrap();
    db.put(key_b.as_slice(), &value_b).await.unwrap();
    sqlx::query("INSERT INTO blocks (key, data) VALUES ($1, $2)")
        .bind("/blocks/not-a-multihash")
        .bind(&b"foreign"[..])
        .execute(db.store().pool())
        .await
        .unwrap();

    let mut iter = db.new_iterator(&[], &[]);
    let mut keys = Vec::new();
    while iter.next().await {
        keys.push(iter.key().unwrap().to_vec());
    }
    assert!(iter.error().is_none());
    iter.release();

    let mut expected = vec![key_a.to_vec(), key_b.to_vec()];
    expected.sort();
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn stat_reports_backend_and_cache() {
    let registry = CacheRegistry::new();
    let db = in_memory(&registry, CacheConfig::default()).await;
    let ((key, value), _) = make_header_pair(1_060);

    db.put(key.as_slice(), &value).await.unwrap();
    db.get(key.as_slice()).await.unwrap();
    db.get(key.as_slice()).await.unwrap();

    assert_eq!(db.stat(STAT_BACKEND).await.unwrap(), "SQLite");
    let cache = db.stat(STAT_CACHE).await.unwrap();
    assert!(cache.starts_with("hits=1 loads=1 "), "got {cache}");
    assert!(matches!(db.stat("leveldb.stats").await, Err(KvError::NotSupported(_))));
}
