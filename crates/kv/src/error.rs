//! Error types for key-value store operations.

use std::sync::Arc;

/// A shareable, type-erased backend error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for key-value store operations.
pub type KvResult<T, E = KvError> = Result<T, E>;

/// Error type for key-value store operations.
///
/// The error is [`Clone`] so that every caller coalesced onto a single cache
/// load observes the same outcome. Backend failures are therefore held behind
/// an [`Arc`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    /// The native key is not a digest of the expected length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    KeyFormat {
        /// The expected digest length.
        expected: usize,
        /// The length of the key that was supplied.
        actual: usize,
    },

    /// A stored key could not be decoded back into a native key.
    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    /// The backing store holds no row for the derived key.
    ///
    /// This is an expected outcome, not an infrastructure failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Beginning, executing within, or committing a transaction failed.
    ///
    /// A batch that returned this error must be reset before reuse.
    #[error("transaction error: {0}")]
    Transaction(#[source] SharedError),

    /// The batch was already written, or poisoned by a failed statement, and
    /// has not been reset since.
    #[error("batch must be reset before reuse")]
    BatchFinished,

    /// The operation is not supported by this store.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// A cache with this name is already registered.
    #[error("cache name already registered: {0}")]
    CacheNameInUse(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// An error occurred in the storage backend.
    #[error("backend error: {0}")]
    Backend(#[source] SharedError),
}

impl KvError {
    /// Create a new backend error from any error type.
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Arc::new(error))
    }

    /// Create a new transaction error from any error type.
    pub fn transaction<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transaction(Arc::new(error))
    }

    /// True if this is a [`KvError::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True if this is a [`KvError::KeyFormat`].
    pub const fn is_key_format(&self) -> bool {
        matches!(self, Self::KeyFormat { .. })
    }
}
