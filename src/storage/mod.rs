//! Local chunk storage, as seen by the replication engine
//!
//! The engine only enumerates, counts and reads chunks; it never writes
//! to local storage.

pub mod fs;
pub mod memory;

pub use fs::FsChunkStore;
pub use memory::MemChunkStore;

use crate::common::{ChunkId, ChunkKind, Result};
use bytes::Bytes;

/// Read-only view of a content-addressed chunk corpus
pub trait ChunkStore: Send + Sync {
    /// Up to `limit` ids starting at `offset`, in hash order. Empty once
    /// `offset` is past the end.
    fn enumerate(&self, kind: ChunkKind, offset: usize, limit: usize) -> Result<Vec<ChunkId>>;

    /// Chunk bytes, or `None` if the chunk is not stored locally
    fn read_chunk(&self, id: &ChunkId, kind: ChunkKind) -> Result<Option<Bytes>>;

    fn contains(&self, id: &ChunkId, kind: ChunkKind) -> Result<bool>;

    fn total_count(&self, kind: ChunkKind) -> Result<u64>;
}

/// Slice `ids[offset..offset + limit]`, clamped to the end
pub(crate) fn page(ids: &[ChunkId], offset: usize, limit: usize) -> Vec<ChunkId> {
    if offset >= ids.len() {
        return Vec::new();
    }
    let end = offset.saturating_add(limit).min(ids.len());
    ids[offset..end].to_vec()
}
