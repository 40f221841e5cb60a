//! In-memory chunk store

use super::{page, ChunkStore};
use crate::common::{ChunkId, ChunkKind, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Chunk store held in memory, ordered by hash
#[derive(Default)]
pub struct MemChunkStore {
    data: RwLock<BTreeMap<ChunkId, Bytes>>,
    meta: RwLock<BTreeMap<ChunkId, Bytes>>,
}

impl MemChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: ChunkKind) -> &RwLock<BTreeMap<ChunkId, Bytes>> {
        match kind {
            ChunkKind::Data => &self.data,
            ChunkKind::Meta => &self.meta,
        }
    }

    /// Store `content` under its own hash and return the id
    pub fn insert(&self, kind: ChunkKind, content: impl Into<Bytes>) -> ChunkId {
        let content = content.into();
        let id = ChunkId::for_bytes(&content);
        self.map(kind)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, content);
        id
    }

    /// Register an id without readable content
    pub fn insert_corrupt(&self, kind: ChunkKind, id: ChunkId, content: impl Into<Bytes>) {
        self.map(kind)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, content.into());
    }

    /// All ids of one kind, in hash order
    pub fn ids(&self, kind: ChunkKind) -> Vec<ChunkId> {
        self.map(kind)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

impl ChunkStore for MemChunkStore {
    fn enumerate(&self, kind: ChunkKind, offset: usize, limit: usize) -> Result<Vec<ChunkId>> {
        Ok(page(&self.ids(kind), offset, limit))
    }

    fn read_chunk(&self, id: &ChunkId, kind: ChunkKind) -> Result<Option<Bytes>> {
        let map = self.map(kind).read().unwrap_or_else(|e| e.into_inner());
        match map.get(id) {
            Some(bytes) if !id.matches(bytes) => Err(crate::Error::ChecksumMismatch {
                expected: id.to_hex(),
                actual: crate::common::blake3_hash(bytes),
            }),
            Some(bytes) => Ok(Some(bytes.clone())),
            None => Ok(None),
        }
    }

    fn contains(&self, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        Ok(self
            .map(kind)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id))
    }

    fn total_count(&self, kind: ChunkKind) -> Result<u64> {
        Ok(self.map(kind).read().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }
}
