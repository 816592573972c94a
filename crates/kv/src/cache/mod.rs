//! Named read-through cache for store lookups.
//!
//! [`ReadCache`] sits in front of a backend's read path. It bounds its
//! resident size with an LRU policy, expires entries lazily after a fixed
//! age, and coalesces concurrent misses for the same key into a single
//! backend load.
//!
//! # Staleness
//!
//! Writes never invalidate cached entries. A read that follows a committed
//! write of the same key may return the previously cached value until that
//! entry reaches [`CacheConfig::expiry`]. The cache is never authoritative;
//! the backing store is, and every entry can be rebuilt from it.

mod registry;
pub use registry::CacheRegistry;

use crate::KvResult;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, hash_map::Entry},
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, trace};

/// Default cache name.
pub const DEFAULT_CACHE_NAME: &str = "kv";

/// Default resident byte budget (3 MB).
pub const DEFAULT_CACHE_SIZE: usize = 3_000_000;

/// Default entry expiry (one hour).
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Configuration for a [`ReadCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Registry identity. Must be unique among live caches in a registry.
    pub name: String,
    /// Resident byte budget. Each entry costs its key length plus its value
    /// length.
    pub size: usize,
    /// Maximum entry age before it is treated as absent.
    pub expiry: Duration,
}

impl CacheConfig {
    /// Create a new cache configuration.
    pub fn new(name: impl Into<String>, size: usize, expiry: Duration) -> Self {
        Self { name: name.into(), size, expiry }
    }

    /// Set the cache name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the resident byte budget.
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the entry expiry.
    pub const fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_NAME, DEFAULT_CACHE_SIZE, DEFAULT_CACHE_EXPIRY)
    }
}

/// A point-in-time snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a resident, unexpired entry.
    pub hits: u64,
    /// Loads issued against the backend.
    pub loads: u64,
    /// Lookups that waited on another caller's in-flight load.
    pub coalesced: u64,
    /// Entries evicted to stay within the byte budget.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct CacheEntry {
    value: Bytes,
    inserted: Instant,
}

type Flight = broadcast::Sender<KvResult<Bytes>>;

struct CacheInner {
    entries: LruCache<Bytes, CacheEntry>,
    resident: usize,
    in_flight: HashMap<Bytes, Flight>,
}

impl CacheInner {
    fn new() -> Self {
        Self { entries: LruCache::unbounded(), resident: 0, in_flight: HashMap::new() }
    }

    /// Look up a live entry, dropping it if it has expired.
    fn lookup(&mut self, key: &Bytes, expiry: Duration) -> Option<Bytes> {
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.inserted.elapsed() < expiry => return Some(entry.value.clone()),
            Some(_) => {}
        }
        self.remove(key);
        None
    }

    fn remove(&mut self, key: &Bytes) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.resident -= key.len() + entry.value.len();
                true
            }
            None => false,
        }
    }

    /// Insert an entry, returning the number of entries evicted to make room.
    fn insert(&mut self, key: Bytes, value: Bytes, budget: usize) -> u64 {
        let cost = key.len() + value.len();
        if cost > budget {
            self.remove(&key);
            return 0;
        }

        let entry = CacheEntry { value, inserted: Instant::now() };
        if let Some(old) = self.entries.put(key.clone(), entry) {
            self.resident -= key.len() + old.value.len();
        }
        self.resident += cost;

        let mut evicted = 0;
        while self.resident > budget {
            let Some((k, old)) = self.entries.pop_lru() else { break };
            self.resident -= k.len() + old.value.len();
            evicted += 1;
        }
        evicted
    }
}

/// A named, size-bounded, time-bounded read-through cache.
///
/// Safe for concurrent use. The internal lock is never held across an
/// await point.
pub struct ReadCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    counters: Counters,
}

impl core::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadCache")
            .field("name", &self.config.name)
            .field("size", &self.config.size)
            .field("expiry", &self.config.expiry)
            .finish_non_exhaustive()
    }
}

impl ReadCache {
    /// Create a new, empty cache.
    ///
    /// Caches shared between stores should be obtained through a
    /// [`CacheRegistry`] instead.
    pub fn new(config: CacheConfig) -> Self {
        Self { config, inner: Mutex::new(CacheInner::new()), counters: Counters::default() }
    }

    /// The cache name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The cache configuration.
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the value for `key`, invoking `loader` on a miss.
    ///
    /// On a hit the loader is not called. On a miss exactly one caller per
    /// key runs its loader; callers that arrive while that load is in flight
    /// wait for it and receive the same value or error. Successful loads are
    /// cached, errors are not. If the loading caller is dropped before the
    /// load completes, waiting callers retry and one of them loads instead.
    pub async fn get_or_load<F, Fut>(&self, key: &[u8], loader: F) -> KvResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = KvResult<Bytes>>,
    {
        let key = Bytes::copy_from_slice(key);

        loop {
            let mut waiter = {
                let mut inner = self.inner.lock();
                if let Some(value) = inner.lookup(&key, self.config.expiry) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(target: "kv::cache", cache = %self.config.name, "cache hit");
                    return Ok(value);
                }
                match inner.in_flight.entry(key.clone()) {
                    Entry::Occupied(flight) => flight.get().subscribe(),
                    Entry::Vacant(slot) => {
                        slot.insert(broadcast::channel(1).0);
                        break;
                    }
                }
            };

            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            match waiter.recv().await {
                Ok(result) => return result,
                // The loading caller was dropped mid-load.
                Err(_) => continue,
            }
        }

        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        debug!(target: "kv::cache", cache = %self.config.name, "cache miss, loading");

        let guard = FlightGuard { cache: self, key: Some(key) };
        let result = loader().await;
        guard.complete(result)
    }

    /// Remove an entry. Returns true if it was resident.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.inner.lock().remove(&Bytes::copy_from_slice(key))
    }

    /// Drop every resident entry. In-flight loads are unaffected.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.resident = 0;
    }

    /// Number of resident entries, including expired entries not yet
    /// touched.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident bytes, counting key and value lengths.
    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().resident
    }

    /// Snapshot the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Owns the in-flight slot for a key while its load runs.
///
/// Dropping the guard without completing it releases the slot, which wakes
/// waiters so they can retry.
struct FlightGuard<'a> {
    cache: &'a ReadCache,
    key: Option<Bytes>,
}

impl FlightGuard<'_> {
    fn complete(mut self, result: KvResult<Bytes>) -> KvResult<Bytes> {
        let Some(key) = self.key.take() else { return result };

        let flight = {
            let mut inner = self.cache.inner.lock();
            let flight = inner.in_flight.remove(&key);
            if let Ok(value) = &result {
                let evicted = inner.insert(key, value.clone(), self.cache.config.size);
                self.cache.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            }
            flight
        };

        if let Some(flight) = flight {
            // No receivers is fine.
            let _ = flight.send(result.clone());
        }
        result
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.inner.lock().in_flight.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KvError;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::Notify;

    fn cache(size: usize, expiry: Duration) -> ReadCache {
        ReadCache::new(CacheConfig::new("test", size, expiry))
    }

    async fn resident() -> KvResult<Bytes> {
        panic!("loader called for a resident key")
    }

    #[tokio::test]
    async fn hit_skips_loader() {
        let cache = cache(1024, DEFAULT_CACHE_EXPIRY);

        let v = cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"v")) }).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"v"));

        let v = cache.get_or_load(b"k", resident).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"v"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(cache.resident_bytes(), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = cache(1024, DEFAULT_CACHE_EXPIRY);

        let err = cache
            .get_or_load(b"k", || async { Err(KvError::NotFound("k".into())) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());

        let v = cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"v")) }).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(cache.stats().loads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily() {
        let cache = cache(1024, Duration::from_secs(10));

        cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"old")) }).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        let v = cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"new")) }).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"old"));

        tokio::time::advance(Duration::from_secs(2)).await;
        // Still resident until the next access.
        assert_eq!(cache.len(), 1);
        let v = cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"new")) }).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"new"));
        assert_eq!(cache.stats().loads, 2);
    }

    #[tokio::test]
    async fn zero_expiry_always_loads() {
        let cache = cache(1024, Duration::ZERO);
        for _ in 0..3 {
            cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"v")) }).await.unwrap();
        }
        assert_eq!(cache.stats().loads, 3);
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn lru_eviction_respects_budget() {
        // Each entry costs 1 (key) + 4 (value) bytes.
        let cache = cache(10, DEFAULT_CACHE_EXPIRY);

        for key in [b"a", b"b"] {
            cache.get_or_load(key, || async { Ok(Bytes::from_static(b"1234")) }).await.unwrap();
        }
        assert_eq!(cache.resident_bytes(), 10);

        // Touch "a" so that "b" is least recently used.
        cache.get_or_load(b"a", resident).await.unwrap();
        cache.get_or_load(b"c", || async { Ok(Bytes::from_static(b"1234")) }).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resident_bytes(), 10);
        assert_eq!(cache.stats().evictions, 1);

        let reloaded = AtomicUsize::new(0);
        cache
            .get_or_load(b"b", || async {
                reloaded.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"1234"))
            })
            .await
            .unwrap();
        assert_eq!(reloaded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_values_are_not_cached() {
        let cache = cache(4, DEFAULT_CACHE_EXPIRY);
        let v = cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"too big")) }).await;
        assert_eq!(v.unwrap(), Bytes::from_static(b"too big"));
        assert!(cache.is_empty());
        assert_eq!(cache.resident_bytes(), 0);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let cache = cache(1024, DEFAULT_CACHE_EXPIRY);
        for key in [b"a", b"b"] {
            cache.get_or_load(key, || async { Ok(Bytes::from_static(b"v")) }).await.unwrap();
        }
        assert!(cache.remove(b"a"));
        assert!(!cache.remove(b"a"));
        assert_eq!(cache.resident_bytes(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.resident_bytes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_load() {
        let cache = Arc::new(cache(1024, DEFAULT_CACHE_EXPIRY));
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            let release = release.clone();
            tasks.spawn(async move {
                cache
                    .get_or_load(b"shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(Bytes::from_static(b"value"))
                    })
                    .await
            });
        }

        // Wait until one load is in flight and every other caller is parked.
        while cache.stats().loads + cache.stats().coalesced < 16 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        while let Some(res) = tasks.join_next().await {
            assert_eq!(res.unwrap().unwrap(), Bytes::from_static(b"value"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads, 1);
        assert_eq!(cache.stats().coalesced, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_waiters_share_errors() {
        let cache = Arc::new(cache(1024, DEFAULT_CACHE_EXPIRY));
        let release = Arc::new(Notify::new());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let release = release.clone();
            tasks.spawn(async move {
                cache
                    .get_or_load(b"missing", || async move {
                        release.notified().await;
                        Err(KvError::NotFound("missing".into()))
                    })
                    .await
            });
        }

        while cache.stats().loads + cache.stats().coalesced < 8 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        while let Some(res) = tasks.join_next().await {
            assert!(res.unwrap().unwrap_err().is_not_found());
        }
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn cancelled_load_hands_over() {
        let cache = Arc::new(cache(1024, DEFAULT_CACHE_EXPIRY));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.get_or_load(b"k", || std::future::pending::<KvResult<Bytes>>()).await
            })
        };
        while cache.stats().loads == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.get_or_load(b"k", || async { Ok(Bytes::from_static(b"v")) }).await
            })
        };
        while cache.stats().coalesced == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        assert_eq!(follower.await.unwrap().unwrap(), Bytes::from_static(b"v"));
        assert_eq!(cache.stats().loads, 2);
    }
}
