//! In-memory key-value store implementation.
//!
//! This is not a good implementation for production use, but is useful for
//! testing.

use crate::{
    KeyValueReader, KeyValueStore, KeyValueWriter, KvBatch, KvError, KvIterator, KvResult,
    StorageKey,
};
use alloy::primitives::B256;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

type Store = BTreeMap<B256, Bytes>;

/// Validate a native key the same way persistent backends do.
fn native_key(key: &[u8]) -> KvResult<B256> {
    StorageKey::from_native(key)?;
    Ok(B256::from_slice(key))
}

/// A simple in-memory key-value store using a [`BTreeMap`].
///
/// Batches record their operations and apply them under a single write lock
/// on [`KvBatch::write`], so they support [`KvBatch::replay`].
#[derive(Clone)]
pub struct MemKv {
    map: Arc<RwLock<Store>>,
    closed: Arc<AtomicBool>,
}

impl core::fmt::Debug for MemKv {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemKv").finish()
    }
}

impl MemKv {
    /// Create a new empty in-memory KV store.
    pub fn new() -> Self {
        Self { map: Arc::default(), closed: Arc::default() }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> KvResult<()> {
        if self.closed.load(Ordering::Acquire) { Err(KvError::Closed) } else { Ok(()) }
    }
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueReader for MemKv {
    async fn has(&self, key: &[u8]) -> KvResult<bool> {
        self.ensure_open()?;
        let key = native_key(key)?;
        Ok(self.map.read().contains_key(&key))
    }

    async fn get(&self, key: &[u8]) -> KvResult<Bytes> {
        self.ensure_open()?;
        let native = native_key(key)?;
        self.map
            .read()
            .get(&native)
            .cloned()
            .ok_or_else(|| KvError::NotFound(StorageKey::from_digest(&native).into_string()))
    }
}

impl KeyValueWriter for MemKv {
    async fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.ensure_open()?;
        let key = native_key(key)?;
        self.map.write().insert(key, Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> KvResult<()> {
        self.ensure_open()?;
        let key = native_key(key)?;
        self.map.write().remove(&key);
        Ok(())
    }
}

impl KeyValueStore for MemKv {
    type Batch = MemBatch;
    type Iter = MemIter;

    fn new_batch(&self) -> Self::Batch {
        MemBatch { store: self.clone(), ops: Vec::new(), value_size: 0, written: false }
    }

    fn new_iterator(&self, start: &[u8], prefix: &[u8]) -> Self::Iter {
        MemIter {
            store: self.clone(),
            prefix: prefix.to_vec(),
            seek: [prefix, start].concat(),
            snapshot: None,
            current: None,
            error: None,
            released: false,
        }
    }

    async fn stat(&self, property: &str) -> KvResult<String> {
        self.ensure_open()?;
        match property {
            "mem.entries" => Ok(self.len().to_string()),
            _ => Err(KvError::NotSupported("unknown stat property")),
        }
    }

    async fn close(&self) -> KvResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum QueuedOp {
    Put(B256, Bytes),
    Delete(B256),
}

/// Batch for [`MemKv`].
#[derive(Debug)]
pub struct MemBatch {
    store: MemKv,
    ops: Vec<QueuedOp>,
    value_size: usize,
    written: bool,
}

impl MemBatch {
    fn queue(&mut self, key: &[u8], op: impl FnOnce(B256) -> QueuedOp) -> KvResult<()> {
        if self.written {
            return Err(KvError::BatchFinished);
        }
        self.store.ensure_open()?;
        let key = native_key(key)?;
        self.ops.push(op(key));
        Ok(())
    }
}

impl KvBatch for MemBatch {
    async fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.queue(key, |k| QueuedOp::Put(k, Bytes::copy_from_slice(value)))?;
        self.value_size += value.len();
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.queue(key, QueuedOp::Delete)
    }

    fn value_size(&self) -> usize {
        self.value_size
    }

    async fn write(&mut self) -> KvResult<()> {
        if std::mem::replace(&mut self.written, true) || self.ops.is_empty() {
            return Ok(());
        }
        self.store.ensure_open()?;

        let mut map = self.store.map.write();
        for op in &self.ops {
            match op {
                QueuedOp::Put(k, v) => {
                    map.insert(*k, v.clone());
                }
                QueuedOp::Delete(k) => {
                    map.remove(k);
                }
            }
        }
        self.written = true;
        Ok(())
    }

    async fn replay<W: KeyValueWriter>(&self, sink: &W) -> KvResult<()> {
        for op in &self.ops {
            match op {
                QueuedOp::Put(k, v) => sink.put(k.as_slice(), v).await?,
                QueuedOp::Delete(k) => sink.delete(k.as_slice()).await?,
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.ops.clear();
        self.value_size = 0;
        self.written = false;
    }
}

/// Iterator for [`MemKv`].
#[derive(Debug)]
pub struct MemIter {
    store: MemKv,
    prefix: Vec<u8>,
    seek: Vec<u8>,
    snapshot: Option<std::vec::IntoIter<(B256, Bytes)>>,
    current: Option<(B256, Bytes)>,
    error: Option<KvError>,
    released: bool,
}

impl KvIterator for MemIter {
    async fn next(&mut self) -> bool {
        if self.released || self.error.is_some() {
            return false;
        }

        if self.snapshot.is_none() {
            if let Err(err) = self.store.ensure_open() {
                self.error = Some(err);
                return false;
            }
            let snapshot: Vec<_> = self
                .store
                .map
                .read()
                .iter()
                .filter(|(k, _)| k.starts_with(&self.prefix) && k.as_slice() >= self.seek.as_slice())
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            self.snapshot = Some(snapshot.into_iter());
        }

        self.current = self.snapshot.as_mut().and_then(Iterator::next);
        self.current.is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_ref())
    }

    fn error(&self) -> Option<&KvError> {
        self.error.as_ref()
    }

    fn release(&mut self) {
        self.released = true;
        self.snapshot = None;
        self.current = None;
    }
}
