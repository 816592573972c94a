//! Transaction-backed write batches.

use crate::{
    SqlKvError,
    store::{AnyTransaction, BatchPin, SqlStore},
};
use signet_kv::{KeyValueWriter, KvBatch, KvError, KvResult, StorageKey};
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, trace};

enum BatchState {
    /// Nothing queued since the last reset.
    Fresh,
    /// At least one operation has executed in this transaction.
    Open(AnyTransaction, BatchPin),
    /// Written or poisoned. Requires a reset.
    Finished,
}

impl BatchState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Open(..) => "open",
            Self::Finished => "finished",
        }
    }
}

/// A write batch executing its operations eagerly in one SQL transaction.
///
/// The transaction is begun by the first [`put`] or [`delete`], so a batch
/// that is never used holds no connection. Operations execute immediately
/// but remain invisible to other readers until [`write`] commits them.
/// Dropping or [resetting] an unwritten batch rolls its transaction back.
///
/// Because operations are not retained, [`replay`] is not supported.
///
/// [`put`]: KvBatch::put
/// [`delete`]: KvBatch::delete
/// [`write`]: KvBatch::write
/// [resetting]: KvBatch::reset
/// [`replay`]: KvBatch::replay
pub struct SqlBatch {
    store: SqlStore,
    closed: Arc<AtomicBool>,
    state: BatchState,
    value_size: usize,
}

impl core::fmt::Debug for SqlBatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqlBatch")
            .field("state", &self.state.name())
            .field("value_size", &self.value_size)
            .finish_non_exhaustive()
    }
}

impl SqlBatch {
    pub(crate) const fn new(store: SqlStore, closed: Arc<AtomicBool>) -> Self {
        Self { store, closed, state: BatchState::Fresh, value_size: 0 }
    }

    /// True if the batch has an uncommitted transaction.
    pub const fn is_open(&self) -> bool {
        matches!(self.state, BatchState::Open(..))
    }

    /// True if the batch was written, or poisoned, and must be reset.
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, BatchState::Finished)
    }

    /// Make sure a transaction is open, beginning one if the batch is fresh.
    ///
    /// Once the database is closed, any open transaction is dropped so its
    /// connection can be closed.
    async fn ensure_transaction(&mut self) -> KvResult<()> {
        if self.closed.load(Ordering::Acquire) {
            if self.is_open() {
                self.state = BatchState::Finished;
            }
            return Err(KvError::Closed);
        }
        if self.is_finished() {
            return Err(KvError::BatchFinished);
        }
        if !self.is_open() {
            let (tx, pin) = self.store.begin_pinned().await?;
            self.state = BatchState::Open(tx, pin);
            trace!(target: "kv::sql", "batch transaction begun");
        }
        Ok(())
    }

    /// Poison the batch if a statement failed. Dropping the transaction
    /// rolls it back.
    fn settle(&mut self, result: KvResult<()>) -> KvResult<()> {
        if result.is_err() {
            self.state = BatchState::Finished;
        }
        result
    }
}

impl KvBatch for SqlBatch {
    async fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let key = StorageKey::from_native(key)?;
        self.ensure_transaction().await?;

        let BatchState::Open(tx, _) = &mut self.state else {
            return Err(KvError::BatchFinished);
        };
        let result = self.store.put(tx, &key, value).await;
        self.settle(result)?;

        self.value_size += value.len();
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        let key = StorageKey::from_native(key)?;
        self.ensure_transaction().await?;

        let BatchState::Open(tx, _) = &mut self.state else {
            return Err(KvError::BatchFinished);
        };
        let result = self.store.delete(tx, &key).await;
        self.settle(result)
    }

    fn value_size(&self) -> usize {
        self.value_size
    }

    async fn write(&mut self) -> KvResult<()> {
        let BatchState::Open(tx, _pin) = std::mem::replace(&mut self.state, BatchState::Finished)
        else {
            return Ok(());
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }

        tx.commit().await.map_err(|e| SqlKvError::from(e).into_transaction())?;
        debug!(target: "kv::sql", value_size = self.value_size, "batch committed");
        Ok(())
    }

    fn replay<W: KeyValueWriter>(&self, _sink: &W) -> impl Future<Output = KvResult<()>> + Send {
        std::future::ready(Err(KvError::NotSupported("replay of eagerly executed batches")))
    }

    fn reset(&mut self) {
        if self.is_open() {
            debug!(target: "kv::sql", value_size = self.value_size, "rolling back batch");
        }
        self.state = BatchState::Fresh;
        self.value_size = 0;
    }
}
