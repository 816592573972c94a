//! Error types for SQL key-value storage.

use signet_kv::KvError;

/// Errors that can occur in SQL key-value storage operations.
#[derive(Debug, thiserror::Error)]
pub enum SqlKvError {
    /// A sqlx database error occurred.
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The connected database is neither PostgreSQL nor SQLite.
    #[error("unsupported database backend: {0}")]
    UnsupportedBackend(String),

    /// Every pool connection is held by a batch with uncommitted work.
    #[error("all {0} pool connections are held by open batches")]
    ConnectionsPinned(u32),
}

impl SqlKvError {
    /// Convert into a [`KvError::Transaction`], for failures on the
    /// transaction path (begin, statements within a transaction, commit).
    pub(crate) fn into_transaction(self) -> KvError {
        KvError::transaction(self)
    }
}

impl From<SqlKvError> for KvError {
    fn from(error: SqlKvError) -> Self {
        Self::backend(error)
    }
}
