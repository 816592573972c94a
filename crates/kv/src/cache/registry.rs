use super::{CacheConfig, ReadCache};
use crate::{KvError, KvResult};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// A registry of named [`ReadCache`]s.
///
/// The registry is owned by whatever constructs stores and is passed to them
/// explicitly. Names are unique among live caches: registering an active
/// name fails, and a store deregisters its cache when closed so the name can
/// be reused.
///
/// Cloning the registry yields a handle to the same set of caches.
#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    caches: Arc<Mutex<HashMap<String, Arc<ReadCache>>>>,
}

impl CacheRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a cache.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::CacheNameInUse`] if a cache with the same name is
    /// already registered.
    pub fn register(&self, config: CacheConfig) -> KvResult<Arc<ReadCache>> {
        let mut caches = self.caches.lock();
        if caches.contains_key(&config.name) {
            return Err(KvError::CacheNameInUse(config.name));
        }

        debug!(target: "kv::cache", cache = %config.name, size = config.size, expiry = ?config.expiry, "registering cache");
        let cache = Arc::new(ReadCache::new(config));
        caches.insert(cache.name().to_owned(), cache.clone());
        Ok(cache)
    }

    /// Get a registered cache by name.
    pub fn get(&self, name: &str) -> Option<Arc<ReadCache>> {
        self.caches.lock().get(name).cloned()
    }

    /// True if a cache with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.caches.lock().contains_key(name)
    }

    /// Deregister a cache, returning it if it was registered.
    ///
    /// Holders of the returned cache may keep using it; it is simply no
    /// longer reachable by name.
    pub fn deregister(&self, name: &str) -> Option<Arc<ReadCache>> {
        let removed = self.caches.lock().remove(name);
        if removed.is_some() {
            debug!(target: "kv::cache", cache = %name, "deregistered cache");
        }
        removed
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    /// True if no caches are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
