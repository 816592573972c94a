//! Conformance tests for [`KeyValueStore`] backends.
//!
//! These tests verify that any backend implementation behaves correctly
//! according to the [`KeyValueStore`] contract. To use these tests with a
//! custom backend, call [`conformance`] with your backend instance.
//!
//! Several tests read a key, rewrite it, and read it again. Backends that
//! front their reads with a [`ReadCache`] must therefore be configured with a
//! zero expiry when running this suite; cache staleness is a documented
//! bound, covered by backend-specific tests.
//!
//! Each test uses its own keys, so the suite can run against a single store.
//!
//! [`ReadCache`]: crate::ReadCache

use crate::{KeyValueStore, KvBatch, KvError, KvIterator};
use alloy::{
    consensus::Header,
    primitives::{B256, Bytes as AlloyBytes, keccak256},
};
use bytes::Bytes;

/// Run all conformance tests against a backend.
///
/// Does not close the store; see [`test_close`].
pub async fn conformance<S: KeyValueStore>(store: &S) {
    test_put_get_roundtrip(store).await;
    test_delete_then_get(store).await;
    test_value_size(store).await;
    test_has(store).await;
    test_header_batch_scenario(store).await;
    test_malformed_key(store).await;
    test_batch_requires_reset(store).await;
    test_reset_discards(store).await;
    test_empty_batch_write(store).await;
    test_iterator_order_and_prefix(store).await;
    test_iterator_snapshot(store).await;
}

/// Create an RLP-encoded header keyed by its hash.
pub fn make_header(number: u64) -> (B256, Bytes) {
    let header = Header {
        number,
        gas_limit: 30_000_000,
        extra_data: AlloyBytes::from(number.to_be_bytes().to_vec()),
        ..Default::default()
    };
    let value = alloy::rlp::encode(&header);
    (header.hash_slow(), Bytes::from(value))
}

/// Create two distinct headers, `number` and `number + 1`.
pub fn make_header_pair(number: u64) -> ((B256, Bytes), (B256, Bytes)) {
    (make_header(number), make_header(number + 1))
}

/// Build a key sharing the 2-byte `prefix`, ending in `last`.
fn prefixed_key(prefix: [u8; 2], last: u8) -> B256 {
    let mut key = B256::ZERO;
    key[..2].copy_from_slice(&prefix);
    key[31] = last;
    key
}

/// Drain an iterator, collecting its pairs.
async fn collect<I: KvIterator>(iter: &mut I) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    while iter.next().await {
        let key = iter.key().expect("positioned iterator has a key").to_vec();
        let value = iter.value().expect("positioned iterator has a value").to_vec();
        pairs.push((key, value));
    }
    pairs
}

/// Count every stored value.
async fn count_entries<S: KeyValueStore>(store: &S) -> usize {
    let mut iter = store.new_iterator(&[], &[]);
    let count = collect(&mut iter).await.len();
    iter.release();
    count
}

/// A put written through a batch reads back byte-for-byte.
pub async fn test_put_get_roundtrip<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(1);

    let err = store.get(key.as_slice()).await.unwrap_err();
    assert!(err.is_not_found(), "expected not found, got {err}");

    let mut batch = store.new_batch();
    batch.put(key.as_slice(), &value).await.unwrap();
    batch.write().await.unwrap();

    assert_eq!(store.get(key.as_slice()).await.unwrap(), value);
    assert_eq!(keccak256(&value), key);
}

/// A delete written through a batch makes the key unreadable.
pub async fn test_delete_then_get<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(10);

    store.put(key.as_slice(), &value).await.unwrap();
    assert_eq!(store.get(key.as_slice()).await.unwrap(), value);

    let mut batch = store.new_batch();
    batch.delete(key.as_slice()).await.unwrap();
    batch.write().await.unwrap();

    assert!(store.get(key.as_slice()).await.unwrap_err().is_not_found());

    // Deleting an absent key is not an error.
    store.delete(key.as_slice()).await.unwrap();
    let mut batch = store.new_batch();
    batch.delete(key.as_slice()).await.unwrap();
    batch.write().await.unwrap();
}

/// `value_size` counts put values only, and is zeroed by reset.
pub async fn test_value_size<S: KeyValueStore>(store: &S) {
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(20);

    let mut batch = store.new_batch();
    assert_eq!(batch.value_size(), 0);

    batch.put(key_a.as_slice(), &value_a).await.unwrap();
    assert_eq!(batch.value_size(), value_a.len());
    batch.put(key_b.as_slice(), &value_b).await.unwrap();
    batch.delete(key_a.as_slice()).await.unwrap();
    assert_eq!(batch.value_size(), value_a.len() + value_b.len());

    batch.write().await.unwrap();
    assert_eq!(batch.value_size(), value_a.len() + value_b.len());

    batch.reset();
    assert_eq!(batch.value_size(), 0);
    batch.reset();
    assert_eq!(batch.value_size(), 0);
}

/// `has` tracks committed puts and deletes.
pub async fn test_has<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(30);

    assert!(!store.has(key.as_slice()).await.unwrap());

    store.put(key.as_slice(), &value).await.unwrap();
    assert!(store.has(key.as_slice()).await.unwrap());

    store.delete(key.as_slice()).await.unwrap();
    assert!(!store.has(key.as_slice()).await.unwrap());

    let mut batch = store.new_batch();
    batch.put(key.as_slice(), &value).await.unwrap();
    batch.write().await.unwrap();
    assert!(store.has(key.as_slice()).await.unwrap());
}

/// Two headers written in one batch, then deleted in a second batch.
pub async fn test_header_batch_scenario<S: KeyValueStore>(store: &S) {
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(40);

    assert!(store.get(key_a.as_slice()).await.unwrap_err().is_not_found());
    assert!(store.get(key_b.as_slice()).await.unwrap_err().is_not_found());

    let mut batch = store.new_batch();
    batch.put(key_a.as_slice(), &value_a).await.unwrap();
    batch.put(key_b.as_slice(), &value_b).await.unwrap();
    batch.write().await.unwrap();

    assert_eq!(store.get(key_a.as_slice()).await.unwrap(), value_a);
    assert_eq!(store.get(key_b.as_slice()).await.unwrap(), value_b);

    batch.reset();
    batch.delete(key_a.as_slice()).await.unwrap();
    batch.delete(key_b.as_slice()).await.unwrap();
    batch.write().await.unwrap();

    assert!(store.get(key_a.as_slice()).await.unwrap_err().is_not_found());
    assert!(store.get(key_b.as_slice()).await.unwrap_err().is_not_found());
    assert!(!store.has(key_a.as_slice()).await.unwrap());
    assert!(!store.has(key_b.as_slice()).await.unwrap());
}

/// Keys of the wrong length are rejected everywhere and write nothing.
pub async fn test_malformed_key<S: KeyValueStore>(store: &S) {
    let before = count_entries(store).await;
    let short = [0xab; 31];
    let long = [0xab; 33];

    let mut batch = store.new_batch();
    let err = batch.put(&short, b"value").await.unwrap_err();
    assert!(matches!(err, KvError::KeyFormat { expected: 32, actual: 31 }), "got {err}");
    assert_eq!(batch.value_size(), 0);
    assert!(batch.delete(&long).await.unwrap_err().is_key_format());

    // The batch is still usable.
    let (key, value) = make_header(50);
    batch.put(key.as_slice(), &value).await.unwrap();
    batch.write().await.unwrap();

    assert!(store.put(&long, b"value").await.unwrap_err().is_key_format());
    assert!(store.delete(&short).await.unwrap_err().is_key_format());
    assert!(store.get(&short).await.unwrap_err().is_key_format());
    assert!(store.has(&[]).await.unwrap_err().is_key_format());

    assert_eq!(count_entries(store).await, before + 1);
}

/// A written batch refuses work until reset.
pub async fn test_batch_requires_reset<S: KeyValueStore>(store: &S) {
    let ((key_a, value_a), (key_b, value_b)) = make_header_pair(60);

    let mut batch = store.new_batch();
    batch.put(key_a.as_slice(), &value_a).await.unwrap();
    batch.write().await.unwrap();

    assert!(matches!(batch.put(key_b.as_slice(), &value_b).await, Err(KvError::BatchFinished)));
    assert!(matches!(batch.delete(key_a.as_slice()).await, Err(KvError::BatchFinished)));
    // Nothing pending, so writing again is a no-op.
    batch.write().await.unwrap();

    batch.reset();
    batch.put(key_b.as_slice(), &value_b).await.unwrap();
    batch.write().await.unwrap();

    assert!(store.has(key_a.as_slice()).await.unwrap());
    assert!(store.has(key_b.as_slice()).await.unwrap());
}

/// Resetting an unwritten batch discards its operations.
pub async fn test_reset_discards<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(70);

    let mut batch = store.new_batch();
    batch.put(key.as_slice(), &value).await.unwrap();
    batch.reset();
    assert_eq!(batch.value_size(), 0);
    batch.write().await.unwrap();

    assert!(!store.has(key.as_slice()).await.unwrap());
    drop(batch);

    // Dropping an unwritten batch discards it too.
    let mut batch = store.new_batch();
    batch.put(key.as_slice(), &value).await.unwrap();
    drop(batch);
    assert!(!store.has(key.as_slice()).await.unwrap());
}

/// Writing a batch with nothing queued succeeds.
pub async fn test_empty_batch_write<S: KeyValueStore>(store: &S) {
    let mut batch = store.new_batch();
    batch.write().await.unwrap();
    batch.reset();
    batch.write().await.unwrap();
    assert_eq!(batch.value_size(), 0);
}

/// Iterators yield ascending keys within the prefix, from the start key.
pub async fn test_iterator_order_and_prefix<S: KeyValueStore>(store: &S) {
    let prefix = [0xaa, 0xbb];

    let mut batch = store.new_batch();
    // Insert out of order.
    for last in [3u8, 1, 4, 0, 2] {
        let key = prefixed_key(prefix, last);
        batch.put(key.as_slice(), &[last; 4]).await.unwrap();
    }
    // Neighbours outside the prefix.
    batch.put(prefixed_key([0xaa, 0xba], 9).as_slice(), b"below").await.unwrap();
    batch.put(prefixed_key([0xaa, 0xbc], 0).as_slice(), b"above").await.unwrap();
    batch.write().await.unwrap();

    let mut iter = store.new_iterator(&[], &prefix);
    let pairs = collect(&mut iter).await;
    assert!(iter.error().is_none());
    assert!(iter.key().is_none());
    assert!(iter.value().is_none());
    let expected: Vec<_> = (0u8..5)
        .map(|last| (prefixed_key(prefix, last).to_vec(), vec![last; 4]))
        .collect();
    assert_eq!(pairs, expected);

    // `start` is relative to the prefix.
    let mut start = [0u8; 30];
    start[29] = 2;
    let mut iter = store.new_iterator(&start, &prefix);
    let keys: Vec<_> = collect(&mut iter).await.into_iter().map(|(k, _)| k).collect();
    let expected: Vec<_> = (2u8..5).map(|last| prefixed_key(prefix, last).to_vec()).collect();
    assert_eq!(keys, expected);

    // A start past every key yields nothing.
    let mut iter = store.new_iterator(&[0xff], &prefix);
    assert!(!iter.next().await);
    assert!(iter.error().is_none());

    // The whole store is ascending.
    let mut iter = store.new_iterator(&[], &[]);
    let keys: Vec<_> = collect(&mut iter).await.into_iter().map(|(k, _)| k).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));

    // Release is idempotent and ends iteration.
    let mut iter = store.new_iterator(&[], &prefix);
    assert!(iter.next().await);
    iter.release();
    iter.release();
    assert!(!iter.next().await);
    assert!(iter.key().is_none());
}

/// Iterators do not observe writes made after their first `next`.
pub async fn test_iterator_snapshot<S: KeyValueStore>(store: &S) {
    let prefix = [0xcc, 0xdd];
    store.put(prefixed_key(prefix, 1).as_slice(), b"one").await.unwrap();
    store.put(prefixed_key(prefix, 3).as_slice(), b"three").await.unwrap();

    let mut iter = store.new_iterator(&[], &prefix);
    assert!(iter.next().await);
    assert_eq!(iter.key(), Some(prefixed_key(prefix, 1).as_slice()));
    assert_eq!(iter.value(), Some(&b"one"[..]));

    store.put(prefixed_key(prefix, 2).as_slice(), b"two").await.unwrap();

    assert!(iter.next().await);
    assert_eq!(iter.key(), Some(prefixed_key(prefix, 3).as_slice()));
    assert!(!iter.next().await);
    iter.release();

    let mut iter = store.new_iterator(&[], &prefix);
    assert_eq!(collect(&mut iter).await.len(), 3);
}

/// `replay` is unsupported for backends that execute batches eagerly.
pub async fn test_replay_unsupported<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(80);

    let mut batch = store.new_batch();
    assert!(matches!(batch.replay(store).await, Err(KvError::NotSupported(_))));

    batch.put(key.as_slice(), &value).await.unwrap();
    assert!(matches!(batch.replay(store).await, Err(KvError::NotSupported(_))));
    batch.write().await.unwrap();
    assert!(matches!(batch.replay(store).await, Err(KvError::NotSupported(_))));
}

/// Close is idempotent, and operations on a closed store fail.
///
/// Run this last: it leaves the store closed.
pub async fn test_close<S: KeyValueStore>(store: &S) {
    let (key, value) = make_header(90);

    store.close().await.unwrap();
    store.close().await.unwrap();

    assert!(matches!(store.get(key.as_slice()).await, Err(KvError::Closed)));
    assert!(matches!(store.has(key.as_slice()).await, Err(KvError::Closed)));
    assert!(matches!(store.put(key.as_slice(), &value).await, Err(KvError::Closed)));
    assert!(matches!(store.delete(key.as_slice()).await, Err(KvError::Closed)));

    let mut batch = store.new_batch();
    assert!(matches!(batch.put(key.as_slice(), &value).await, Err(KvError::Closed)));

    let mut iter = store.new_iterator(&[], &[]);
    assert!(!iter.next().await);
    assert!(matches!(iter.error(), Some(KvError::Closed)));
}
