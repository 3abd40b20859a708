//! Key hashing for hash indexes.

use crate::codec::FixedCodec;
use xxhash_rust::xxh3::xxh3_64;

/// Produces the 64-bit digest used for bucket routing. The index truncates
/// digests to their low 32 bits before masking.
pub trait KeyHasher<K>: Clone {
    fn hash_key(&self, key: &K) -> u64;
}

/// Default hasher: XXH3 over the key's fixed-width encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3KeyHasher;

/// Upper bound on key widths hashed through the stack buffer.
const MAX_HASHED_KEY_WIDTH: usize = 64;

impl<K: FixedCodec> KeyHasher<K> for Xxh3KeyHasher {
    #[inline]
    fn hash_key(&self, key: &K) -> u64 {
        debug_assert!(K::WIDTH <= MAX_HASHED_KEY_WIDTH);
        let mut buf = [0u8; MAX_HASHED_KEY_WIDTH];
        key.encode(&mut buf[..K::WIDTH]);
        xxh3_64(&buf[..K::WIDTH])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xxh3_hasher_is_deterministic() {
        let hasher = Xxh3KeyHasher;
        let a = hasher.hash_key(&42i64);
        let b = hasher.hash_key(&42i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_xxh3_hasher_separates_keys() {
        let hasher = Xxh3KeyHasher;
        assert_ne!(hasher.hash_key(&1i64), hasher.hash_key(&2i64));
    }

    #[test]
    fn test_xxh3_hasher_matches_encoding() {
        // The digest is over the little-endian encoding, not the native value
        let hasher = Xxh3KeyHasher;
        let expected = xxh3_64(&7i32.to_le_bytes());
        assert_eq!(hasher.hash_key(&7i32), expected);
    }
}
