//! Content-addressed storage keys.
//!
//! Native keys are the keccak-256 digests the state engine uses to address
//! values. The backing relation stores each value under a blockstore key
//! derived from the digest:
//!
//! ```text
//! "/blocks/" ++ BASE32_NOPAD(0x1b ++ 0x20 ++ digest)
//! ```
//!
//! where `0x1b` is the multihash code for keccak-256 and `0x20` the digest
//! length. The derivation is pure and invertible, so the read path and the
//! write path always agree on where a value lives.

use crate::{KvError, KvResult};
use alloy::primitives::B256;
use data_encoding::BASE32_NOPAD;
use std::fmt;

/// Length in bytes of a native key.
pub const NATIVE_KEY_LEN: usize = 32;

/// Multihash code for keccak-256.
pub const KECCAK_256_CODE: u8 = 0x1b;

/// Namespace prefix shared by every storage key.
pub const BLOCK_PREFIX: &str = "/blocks/";

const MULTIHASH_LEN: usize = 2 + NATIVE_KEY_LEN;

/// A key in the backing relation, derived from a native key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive the storage key for a native key.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyFormat`] if `native` is not exactly
    /// [`NATIVE_KEY_LEN`] bytes.
    pub fn from_native(native: &[u8]) -> KvResult<Self> {
        if native.len() != NATIVE_KEY_LEN {
            return Err(KvError::KeyFormat { expected: NATIVE_KEY_LEN, actual: native.len() });
        }
        Ok(Self::from_digest(&B256::from_slice(native)))
    }

    /// Derive the storage key for a digest.
    pub fn from_digest(digest: &B256) -> Self {
        let mut multihash = [0u8; MULTIHASH_LEN];
        multihash[0] = KECCAK_256_CODE;
        multihash[1] = NATIVE_KEY_LEN as u8;
        multihash[2..].copy_from_slice(digest.as_slice());
        Self(format!("{BLOCK_PREFIX}{}", BASE32_NOPAD.encode(&multihash)))
    }

    /// Parse a key read back from the backing relation.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::InvalidStorageKey`] if the string is not a key this
    /// codec could have produced.
    pub fn parse(key: impl Into<String>) -> KvResult<Self> {
        let key = Self(key.into());
        key.to_native()?;
        Ok(key)
    }

    /// Recover the native key this storage key was derived from.
    pub fn to_native(&self) -> KvResult<B256> {
        let invalid = || KvError::InvalidStorageKey(self.0.clone());

        let encoded = self.0.strip_prefix(BLOCK_PREFIX).ok_or_else(invalid)?;
        let multihash = BASE32_NOPAD.decode(encoded.as_bytes()).map_err(|_| invalid())?;

        match multihash.as_slice() {
            [KECCAK_256_CODE, len, digest @ ..]
                if *len as usize == NATIVE_KEY_LEN && digest.len() == NATIVE_KEY_LEN =>
            {
                Ok(B256::from_slice(digest))
            }
            _ => Err(invalid()),
        }
    }

    /// The key as stored in the backing relation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<B256> for StorageKey {
    fn from(digest: B256) -> Self {
        Self::from_digest(&digest)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{b256, keccak256};

    // keccak256("")
    const EMPTY_HASH: B256 =
        b256!("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

    #[test]
    fn known_vectors() {
        assert_eq!(
            StorageKey::from_digest(&EMPTY_HASH).as_str(),
            "/blocks/DMQMLUSGAGDPOIZ4SJ7H3MW4Y4B4BZIAWZJ4VARHHN57VWAELWC2I4A"
        );
        assert_eq!(
            StorageKey::from_digest(&B256::ZERO).as_str(),
            "/blocks/DMQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        );
        assert_eq!(keccak256(b""), EMPTY_HASH);
    }

    #[test]
    fn derivation_is_stable() {
        let digest = keccak256(b"signet");
        let a = StorageKey::from_native(digest.as_slice()).unwrap();
        let b = StorageKey::from_native(digest.as_slice()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, StorageKey::from(digest));
    }

    #[test]
    fn wrong_length_is_rejected() {
        for len in [0usize, 1, 31, 33, 64] {
            let err = StorageKey::from_native(&vec![7u8; len]).unwrap_err();
            assert!(err.is_key_format());
            assert!(matches!(err, KvError::KeyFormat { expected: 32, actual } if actual == len));
        }
    }

    #[test]
    fn inverse() {
        let digest = keccak256(b"inverse");
        let key = StorageKey::from_digest(&digest);
        assert_eq!(key.to_native().unwrap(), digest);

        let parsed = StorageKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        let key = StorageKey::from_digest(&EMPTY_HASH).into_string();

        // missing namespace
        assert!(StorageKey::parse(key.trim_start_matches(BLOCK_PREFIX)).is_err());
        // lowercase alphabet
        assert!(StorageKey::parse(key.to_lowercase()).is_err());
        // truncated digest
        assert!(StorageKey::parse(&key[..key.len() - 8]).is_err());
        // sha2-256 multihash code
        let mut sha = [0u8; MULTIHASH_LEN];
        sha[0] = 0x12;
        sha[1] = 0x20;
        assert!(
            StorageKey::parse(format!("{BLOCK_PREFIX}{}", BASE32_NOPAD.encode(&sha))).is_err()
        );
        assert!(StorageKey::parse("").is_err());
    }
}
