//! Connection traits for key-value store backends.

use crate::{CacheRegistry, KeyValueStore};

/// Connector trait for key-value store backends.
///
/// Abstracts the connection process, allowing different backends to
/// implement their own initialization logic. Backends that cache reads
/// register their cache in the supplied registry.
pub trait KvConnect {
    /// The store type produced by this connector.
    type Store: KeyValueStore;

    /// The error type returned by connection attempts.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the backend.
    ///
    /// Async to support backends that require async initialization
    /// (like SQL connection pools).
    fn connect(
        &self,
        registry: &CacheRegistry,
    ) -> impl std::future::Future<Output = Result<Self::Store, Self::Error>> + Send;
}
