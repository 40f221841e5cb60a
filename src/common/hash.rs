//! Hashing utilities for chunkrep
//!
//! - BLAKE3 for content addressing (chunk ids)
//! - Directory prefixes for the on-disk chunk layout

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Length of a chunk hash in bytes
pub const HASH_LEN: usize = 32;

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

/// Content address of a chunk.
///
/// Carries the declared byte length alongside the hash, but equality,
/// hashing and ordering look at the hash only.
#[derive(Clone, Copy, Debug)]
pub struct ChunkId {
    hash: [u8; HASH_LEN],
    len: u64,
}

impl ChunkId {
    pub fn new(hash: [u8; HASH_LEN], len: u64) -> Self {
        Self { hash, len }
    }

    /// Address a chunk by its content
    pub fn for_bytes(data: &[u8]) -> Self {
        Self {
            hash: *blake3::hash(data).as_bytes(),
            len: data.len() as u64,
        }
    }

    /// Parse a lowercase or uppercase hex hash
    pub fn from_hex(s: &str, len: u64) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::InvalidHash(format!("{}: {}", s, e)))?;
        let hash: [u8; HASH_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidHash(format!("{}: expected {} bytes, got {}", s, HASH_LEN, v.len()))
        })?;
        Ok(Self { hash, len })
    }

    pub fn hash(&self) -> &[u8; HASH_LEN] {
        &self.hash
    }

    /// Declared size of the chunk in bytes
    pub fn byte_len(&self) -> u64 {
        self.len
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// First-level directory for this chunk: the first hash byte in hex.
    pub fn prefix(&self) -> String {
        format!("{:02x}", self.hash[0])
    }

    /// Does `data` hash to this id?
    pub fn matches(&self, data: &[u8]) -> bool {
        blake3::hash(data).as_bytes() == &self.hash
    }
}

impl PartialEq for ChunkId {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for ChunkId {}

impl Hash for ChunkId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for ChunkId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

/// Which local store and which peer verb a chunk goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Data,
    Meta,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 2] = [ChunkKind::Data, ChunkKind::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Data => "data",
            ChunkKind::Meta => "meta",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "data" => Ok(ChunkKind::Data),
            "meta" | "metadata" => Ok(ChunkKind::Meta),
            other => Err(Error::Other(format!("unknown chunk kind: {}", other))),
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let data = b"hello world";
        let hash = blake3_hash(data);
        assert_eq!(hash.len(), 64); // BLAKE3 produces 32 bytes = 64 hex chars
    }

    #[test]
    fn test_chunk_id_hex() {
        let id = ChunkId::for_bytes(b"chunk body");
        let parsed = ChunkId::from_hex(&id.to_hex(), 0).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_hex(), blake3_hash(b"chunk body"));
        assert_eq!(id.byte_len(), 10);
    }

    #[test]
    fn test_chunk_id_invalid_hex() {
        assert!(ChunkId::from_hex("zz", 0).is_err());
        assert!(ChunkId::from_hex("abcd", 0).is_err());
    }

    #[test]
    fn test_equality_ignores_length() {
        let a = ChunkId::new([7u8; HASH_LEN], 10);
        let b = ChunkId::new([7u8; HASH_LEN], 99);
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_ordering_by_hash() {
        let mut low = [0u8; HASH_LEN];
        low[0] = 1;
        let mut high = [0u8; HASH_LEN];
        high[0] = 2;
        assert!(ChunkId::new(low, 500) < ChunkId::new(high, 1));
    }

    #[test]
    fn test_chunk_kind_parse() {
        assert_eq!("data".parse::<ChunkKind>().unwrap(), ChunkKind::Data);
        assert_eq!("META".parse::<ChunkKind>().unwrap(), ChunkKind::Meta);
        assert_eq!("metadata".parse::<ChunkKind>().unwrap(), ChunkKind::Meta);
        assert!("block".parse::<ChunkKind>().is_err());
        assert_eq!(ChunkKind::Meta.to_string(), "meta");
    }

    #[test]
    fn test_prefix_and_matches() {
        let id = ChunkId::for_bytes(b"abc");
        assert_eq!(id.prefix().len(), 2);
        assert!(id.to_hex().starts_with(&id.prefix()));
        assert!(id.matches(b"abc"));
        assert!(!id.matches(b"abd"));
    }
}
