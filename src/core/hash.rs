// src/core/hash.rs

//! Content-addressing primitives: the immutable 32-byte `ContentHash` and
//! its lossy 11-byte `ShortHash` projection used as the `LocationDB` key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which hashing scheme produced the bytes of a `ContentHash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashType {
    /// SHA-256, the only algorithm this crate computes directly (used when
    /// hashing checkpoint manifest files); other tags are accepted verbatim
    /// from the out-of-scope blob store for content produced elsewhere.
    Sha256,
    Vso0,
    Dedup,
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sha256 => "sha256",
            Self::Vso0 => "vso0",
            Self::Dedup => "dedup",
        };
        write!(f, "{s}")
    }
}

/// An immutable, bytewise-comparable content fingerprint. Equality is exact
/// byte comparison; this type is derived from content and never mutated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash {
    pub hash_type: HashType,
    pub bytes: [u8; 32],
}

impl ContentHash {
    pub fn new(hash_type: HashType, bytes: [u8; 32]) -> Self {
        Self { hash_type, bytes }
    }

    /// Computes a `ContentHash` from content bytes using SHA-256. Used for
    /// checkpoint manifest files, which this crate produces itself.
    pub fn of(hash_type: HashType, content: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self { hash_type, bytes }
    }

    /// Projects this hash down to its lossy `ShortHash` key.
    pub fn to_short(self) -> ShortHash {
        let mut prefix = [0u8; 11];
        prefix.copy_from_slice(&self.bytes[..11]);
        ShortHash {
            hash_type: self.hash_type,
            prefix,
        }
    }

    pub fn to_hex(self) -> String {
        format!("{}:{}", self.hash_type, hex::encode(self.bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An 11-byte lossy projection of a `ContentHash`, used as the `LocationDB`
/// key. Two distinct content hashes may project to the same `ShortHash`
/// (an accepted, documented collision risk); the rest of the system treats
/// this as "possible but unlikely" and does not attempt to disambiguate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortHash {
    pub hash_type: HashType,
    pub prefix: [u8; 11],
}

impl ShortHash {
    pub fn to_hex(self) -> String {
        format!("{}:{}", self.hash_type, hex::encode(self.prefix))
    }
}

impl fmt::Debug for ShortHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortHash({})", self.to_hex())
    }
}

impl fmt::Display for ShortHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new(HashType::Vso0, [byte; 32])
    }

    #[test]
    fn short_hash_is_deterministic_projection() {
        let h1 = hash(7);
        let h2 = hash(7);
        assert_eq!(h1.to_short(), h2.to_short());
    }

    #[test]
    fn distinct_hashes_can_collide_in_short_form() {
        let mut a = hash(1);
        let mut b = hash(1);
        // Differ only in the tail past the 11-byte prefix: same ShortHash.
        a.bytes[31] = 0xAA;
        b.bytes[31] = 0xBB;
        assert_ne!(a, b);
        assert_eq!(a.to_short(), b.to_short());
    }

    #[test]
    fn of_is_deterministic() {
        let a = ContentHash::of(HashType::Sha256, b"hello");
        let b = ContentHash::of(HashType::Sha256, b"hello");
        assert_eq!(a, b);
        let c = ContentHash::of(HashType::Sha256, b"world");
        assert_ne!(a, c);
    }
}
