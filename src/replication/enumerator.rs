//! Lane-partitioned enumeration of the local corpus

use crate::common::{ChunkId, ChunkKind, Result};
use crate::storage::ChunkStore;
use std::sync::Arc;

/// Walks one lane of a `lanes`-way partition of the chunk ids of `kind`.
///
/// Lane `i` reads batches at offsets `i*B`, `i*B + L*B`, `i*B + 2*L*B`, ...
/// so that lanes of the same kind never overlap.
pub struct ChunkEnumerator {
    store: Arc<dyn ChunkStore>,
    kind: ChunkKind,
    lane: usize,
    stride: usize,
    batch_size: usize,
    offset: usize,
    done: bool,
}

impl ChunkEnumerator {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        kind: ChunkKind,
        lane: usize,
        lanes: usize,
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            kind,
            lane,
            stride: lanes.max(1) * batch_size,
            batch_size,
            offset: lane * batch_size,
            done: false,
        }
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Offset of the next batch
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next batch of this lane; empty once the lane is exhausted
    pub fn next_batch(&mut self) -> Result<Vec<ChunkId>> {
        if self.done {
            return Ok(Vec::new());
        }
        let batch = self.store.enumerate(self.kind, self.offset, self.batch_size)?;
        if batch.is_empty() {
            self.done = true;
        } else {
            self.offset += self.stride;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemChunkStore;
    use std::collections::BTreeSet;

    fn drain(mut lane: ChunkEnumerator) -> Vec<ChunkId> {
        let mut ids = Vec::new();
        loop {
            let batch = lane.next_batch().unwrap();
            if batch.is_empty() {
                break;
            }
            ids.extend(batch);
        }
        assert!(lane.is_done());
        ids
    }

    #[test]
    fn test_lanes_partition_corpus() {
        let store = Arc::new(MemChunkStore::new());
        for n in 0..10u8 {
            store.insert(ChunkKind::Data, vec![n]);
        }
        let all = store.ids(ChunkKind::Data);

        let lanes: Vec<Vec<ChunkId>> = (0..3)
            .map(|i| drain(ChunkEnumerator::new(store.clone(), ChunkKind::Data, i, 3, 2)))
            .collect();

        // Lane 0: offsets 0, 6; lane 1: 2, 8; lane 2: 4
        assert_eq!(lanes[0], [&all[0..2], &all[6..8]].concat());
        assert_eq!(lanes[1], [&all[2..4], &all[8..10]].concat());
        assert_eq!(lanes[2], all[4..6].to_vec());

        let union: BTreeSet<ChunkId> = lanes.iter().flatten().copied().collect();
        assert_eq!(union.len(), 10);
        assert_eq!(lanes.iter().map(Vec::len).sum::<usize>(), 10);
    }

    #[test]
    fn test_empty_corpus() {
        let store = Arc::new(MemChunkStore::new());
        let mut lane = ChunkEnumerator::new(store, ChunkKind::Meta, 0, 3, 100);
        assert!(lane.next_batch().unwrap().is_empty());
        assert!(lane.is_done());
        assert_eq!(lane.offset(), 0);
    }

    #[test]
    fn test_kinds_are_separate() {
        let store = Arc::new(MemChunkStore::new());
        store.insert(ChunkKind::Data, &b"d"[..]);
        store.insert(ChunkKind::Meta, &b"m1"[..]);
        store.insert(ChunkKind::Meta, &b"m2"[..]);

        let meta = drain(ChunkEnumerator::new(store.clone(), ChunkKind::Meta, 0, 1, 10));
        assert_eq!(meta.len(), 2);
        let data = drain(ChunkEnumerator::new(store, ChunkKind::Data, 0, 1, 10));
        assert_eq!(data.len(), 1);
    }
}
