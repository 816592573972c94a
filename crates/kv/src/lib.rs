//! Content-addressed key-value store contract.
//!
//! This crate defines the key-value store interface consumed by the state
//! engine, along with the pieces every backend shares:
//!
//! - [`StorageKey`]: derives the backing store's key from a native keccak-256
//!   key. The derivation is pure and invertible.
//! - [`ReadCache`] and [`CacheRegistry`]: a named, size- and time-bounded
//!   read-through cache with single-flight miss coalescing.
//! - [`KeyValueStore`], [`KvBatch`], [`KvIterator`]: the store contract.
//!
//! # Quick Start
//!
//! ```ignore
//! use signet_kv::{KeyValueReader, KeyValueStore, KvBatch};
//!
//! async fn example<S: KeyValueStore>(db: &S) -> signet_kv::KvResult<()> {
//!     let mut batch = db.new_batch();
//!     batch.put(hash.as_slice(), &rlp).await?;
//!     batch.write().await?;
//!
//!     let value = db.get(hash.as_slice()).await?;
//!     Ok(())
//! }
//! ```
//!
//! For a concrete implementation, see the `signet-kv-sql` crate.
//!
//! # Consistency
//!
//! Batches are atomic: their writes become visible together when
//! [`KvBatch::write`] succeeds, or not at all. Reads may be served from a
//! [`ReadCache`], which writes do not invalidate; a read following a write of
//! the same key may observe the old value for up to the cache's expiry. See
//! the [`cache`] module.
//!
//! # Feature Flags
//!
//! - **`in-memory`**: Enables the [`mem`] module, providing an in-memory
//!   [`KeyValueStore`] backend for testing.
//! - **`test-utils`**: Enables the [`conformance`] module with backend
//!   conformance tests. Implies `in-memory`.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub use cache::{CacheConfig, CacheRegistry, CacheStats, ReadCache};

mod connect;
pub use connect::KvConnect;

mod error;
pub use error::{KvError, KvResult, SharedError};

mod key;
pub use key::{BLOCK_PREFIX, KECCAK_256_CODE, NATIVE_KEY_LEN, StorageKey};

mod traits;
pub use traits::{KeyValueReader, KeyValueStore, KeyValueWriter, KvBatch, KvIterator};

/// Conformance tests for key-value store backends.
#[cfg(any(test, feature = "test-utils"))]
pub mod conformance;

#[cfg(any(test, feature = "in-memory"))]
pub mod mem;
