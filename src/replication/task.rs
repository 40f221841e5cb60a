//! Injection tasks

use crate::common::{ChunkId, ChunkKind};

/// One under-replicated chunk and the peers it may be pushed to.
///
/// Built by a scanner lane, moved through the queue into exactly one
/// injector worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionTask {
    chunk: ChunkId,
    kind: ChunkKind,
    candidates: Vec<String>,
    required: usize,
    found: usize,
}

impl InjectionTask {
    /// `None` when `found` already meets `required`
    pub fn new(
        chunk: ChunkId,
        kind: ChunkKind,
        candidates: Vec<String>,
        required: usize,
        found: usize,
    ) -> Option<Self> {
        if found >= required {
            return None;
        }
        Some(Self {
            chunk,
            kind,
            candidates,
            required,
            found,
        })
    }

    pub fn chunk(&self) -> &ChunkId {
        &self.chunk
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Push targets in the order they should be tried
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Replicas found when the chunk was scanned
    pub fn found(&self) -> usize {
        self.found
    }

    /// Replicas still missing
    pub fn deficit(&self) -> usize {
        self.required - self.found
    }
}
