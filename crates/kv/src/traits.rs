//! The key-value store contract.
//!
//! Keys passed to these traits are native keys: the keccak-256 digest of the
//! value they address. Backends derive a [`StorageKey`] from each native key
//! and reject keys of the wrong length with [`KvError::KeyFormat`].
//!
//! ```text
//! KeyValueStore                 ← Facade
//!   ├─ KeyValueReader           ← get / has
//!   ├─ KeyValueWriter           ← put / delete (implicit transaction)
//!   ├─ new_batch() → KvBatch    ← Atomic group of writes
//!   └─ new_iterator() → KvIterator
//! ```
//!
//! All async methods return futures that are `Send`.
//!
//! [`StorageKey`]: crate::StorageKey
//! [`KvError::KeyFormat`]: crate::KvError::KeyFormat

use crate::{KvError, KvResult};
use bytes::Bytes;
use std::future::Future;

/// Read access to a key-value store.
pub trait KeyValueReader: Send + Sync {
    /// Check whether a value is stored under `key`.
    fn has(&self, key: &[u8]) -> impl Future<Output = KvResult<bool>> + Send;

    /// Get the value stored under `key`.
    ///
    /// Returns [`KvError::NotFound`] if there is none.
    fn get(&self, key: &[u8]) -> impl Future<Output = KvResult<Bytes>> + Send;
}

/// Write access to a key-value store.
///
/// Each call is its own transaction: it is durable and visible once the
/// returned future resolves successfully.
pub trait KeyValueWriter: Send + Sync {
    /// Store `value` under `key`, replacing any existing value.
    fn put(&self, key: &[u8], value: &[u8]) -> impl Future<Output = KvResult<()>> + Send;

    /// Remove the value stored under `key`. Removing an absent key is not an
    /// error.
    fn delete(&self, key: &[u8]) -> impl Future<Output = KvResult<()>> + Send;
}

/// A key-value store, as consumed by the state engine.
pub trait KeyValueStore: KeyValueReader + KeyValueWriter {
    /// The batch type.
    type Batch: KvBatch;

    /// The iterator type.
    type Iter: KvIterator;

    /// Create a fresh batch.
    fn new_batch(&self) -> Self::Batch;

    /// Create an iterator over the keys beginning with `prefix`, starting at
    /// `prefix ++ start`.
    ///
    /// Iterators yield native keys in ascending byte order, from a snapshot
    /// of the store taken when [`KvIterator::next`] is first called.
    fn new_iterator(&self, start: &[u8], prefix: &[u8]) -> Self::Iter;

    /// Query a backend-specific property.
    ///
    /// Returns [`KvError::NotSupported`] for unknown properties.
    fn stat(&self, property: &str) -> impl Future<Output = KvResult<String>> + Send;

    /// Close the store, releasing its resources.
    ///
    /// Idempotent. Operations issued after closing fail with
    /// [`KvError::Closed`].
    fn close(&self) -> impl Future<Output = KvResult<()>> + Send;
}

/// A group of writes committed or discarded as one unit.
///
/// # Lifecycle
///
/// A batch starts fresh. [`put`] and [`delete`] queue operations and
/// [`write`] commits them. After a write, successful or not, the batch must
/// be [`reset`] before it is used again; until then further operations fail
/// with [`KvError::BatchFinished`].
///
/// [`put`]: KvBatch::put
/// [`delete`]: KvBatch::delete
/// [`write`]: KvBatch::write
/// [`reset`]: KvBatch::reset
pub trait KvBatch: Send {
    /// Queue a put.
    fn put(&mut self, key: &[u8], value: &[u8]) -> impl Future<Output = KvResult<()>> + Send;

    /// Queue a delete.
    fn delete(&mut self, key: &[u8]) -> impl Future<Output = KvResult<()>> + Send;

    /// Total length of the values queued by [`put`] since the last reset.
    ///
    /// [`put`]: KvBatch::put
    fn value_size(&self) -> usize;

    /// Commit the queued operations.
    fn write(&mut self) -> impl Future<Output = KvResult<()>> + Send;

    /// Replay the queued operations into `sink`.
    ///
    /// Backends that execute operations eagerly do not retain them, and
    /// return [`KvError::NotSupported`].
    fn replay<W: KeyValueWriter>(&self, sink: &W) -> impl Future<Output = KvResult<()>> + Send;

    /// Discard any uncommitted operations and return the batch to its fresh
    /// state.
    fn reset(&mut self);
}

/// A forward-only cursor over a snapshot of the store.
pub trait KvIterator: Send {
    /// Advance to the next pair. Returns false once exhausted, after an
    /// error, or after [`release`](KvIterator::release).
    fn next(&mut self) -> impl Future<Output = bool> + Send;

    /// The current key, or `None` if not positioned on a pair.
    fn key(&self) -> Option<&[u8]>;

    /// The current value, or `None` if not positioned on a pair.
    fn value(&self) -> Option<&[u8]>;

    /// The error that stopped iteration, if any. Exhaustion is not an error.
    fn error(&self) -> Option<&KvError>;

    /// Release held resources. Idempotent.
    fn release(&mut self);
}
