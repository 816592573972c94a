//! Snapshot iteration over the `blocks` relation.

use crate::SqlStore;
use alloy::primitives::B256;
use bytes::Bytes;
use signet_kv::{KvError, KvIterator, KvResult, StorageKey};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{trace, warn};

/// Iterator over a [`SqlDatabase`](crate::SqlDatabase).
///
/// The relation is read in full on the first call to [`KvIterator::next`],
/// then filtered to the requested prefix and sorted by native key. Rows whose
/// key this codec did not produce are skipped.
#[derive(Debug)]
pub struct SqlIterator {
    store: SqlStore,
    closed: Arc<AtomicBool>,
    prefix: Vec<u8>,
    seek: Vec<u8>,
    snapshot: Option<std::vec::IntoIter<(B256, Bytes)>>,
    current: Option<(B256, Bytes)>,
    error: Option<KvError>,
    released: bool,
}

impl SqlIterator {
    pub(crate) fn new(
        store: SqlStore,
        closed: Arc<AtomicBool>,
        start: &[u8],
        prefix: &[u8],
    ) -> Self {
        Self {
            store,
            closed,
            prefix: prefix.to_vec(),
            seek: [prefix, start].concat(),
            snapshot: None,
            current: None,
            error: None,
            released: false,
        }
    }

    /// Read, decode, filter and order the snapshot.
    async fn load(&self) -> KvResult<Vec<(B256, Bytes)>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }

        let rows = self.store.scan().await?;
        let mut pairs: Vec<_> = rows
            .into_iter()
            .filter_map(|(key, value)| match StorageKey::parse(key).and_then(|k| k.to_native()) {
                Ok(native) => Some((native, value)),
                Err(err) => {
                    warn!(target: "kv::sql", %err, "skipping row with invalid storage key");
                    None
                }
            })
            .filter(|(k, _)| k.starts_with(&self.prefix) && k.as_slice() >= self.seek.as_slice())
            .collect();
        pairs.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        trace!(target: "kv::sql", entries = pairs.len(), "iterator snapshot taken");
        Ok(pairs)
    }
}

impl KvIterator for SqlIterator {
    async fn next(&mut self) -> bool {
        if self.released || self.error.is_some() {
            return false;
        }

        if self.snapshot.is_none() {
            match self.load().await {
                Ok(pairs) => self.snapshot = Some(pairs.into_iter()),
                Err(err) => {
                    self.error = Some(err);
                    return false;
                }
            }
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
