//! SQL backend for the content-addressed key-value store.
//!
//! This crate implements the [`KeyValueStore`] contract over a single
//! relational table, `blocks (key, data)`, keyed by the blockstore key
//! derived from each value's keccak-256 digest.
//!
//! - [`SqlStore`]: row access over a [`sqlx::AnyPool`].
//! - [`SqlDatabase`]: the [`KeyValueStore`] facade, with a read-through
//!   [`ReadCache`] in front of point lookups.
//! - [`SqlBatch`]: a batch executing eagerly inside one transaction.
//! - [`SqlIterator`]: snapshot iteration in native key order.
//! - [`SqlConnector`]: builds a [`SqlDatabase`] from a [`SqlKvConfig`],
//!   typically loaded from the environment.
//!
//! # Supported Databases
//!
//! - **PostgreSQL** (feature `postgres`): Production backend using
//!   connection pooling.
//! - **SQLite** (feature `sqlite`): Lightweight backend for testing and
//!   single-binary deployments.
//!
//! # Feature Flags
//!
//! - **`postgres`**: Enables the PostgreSQL driver.
//! - **`sqlite`**: Enables the SQLite driver.
//! - **`test-utils`**: Enables the SQLite driver and propagates
//!   `signet-kv/test-utils` for conformance testing.
//!
//! [`KeyValueStore`]: signet_kv::KeyValueStore
//! [`ReadCache`]: signet_kv::ReadCache
//! [`SqlKvConfig`]: config::SqlKvConfig

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

mod batch;
pub use batch::SqlBatch;

mod columns;

pub mod config;

mod connector;
pub use connector::{SqlConnector, SqlConnectorError};

mod database;
pub use database::{STAT_BACKEND, STAT_CACHE, SqlDatabase};

mod error;
pub use error::SqlKvError;

mod iter;
pub use iter::SqlIterator;

mod store;
pub use store::{AnyTransaction, POSTGRES, SQLITE, SqlStore};
