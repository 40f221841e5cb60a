//! Scanner lanes: find under-replicated chunks and queue them for injection

use super::context::RunContext;
use super::enumerator::ChunkEnumerator;
use super::locator::ReplicaLocator;
use super::queue::InjectionQueue;
use super::task::InjectionTask;
use crate::common::{ChunkId, ChunkKind};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Result of checking one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Sufficient { found: usize },
    Deficient { found: usize, candidates: usize },
    /// Deficient, but the queue was closed before the task was accepted
    Dropped { found: usize },
}

/// Per-lane totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneSummary {
    pub scanned: u64,
    pub deficient: u64,
    pub stopped: bool,
}

pub struct ReplicationScanner {
    ctx: Arc<RunContext>,
    queue: Arc<InjectionQueue>,
    locator: ReplicaLocator,
    enumerator: ChunkEnumerator,
}

impl ReplicationScanner {
    pub fn new(ctx: Arc<RunContext>, queue: Arc<InjectionQueue>, enumerator: ChunkEnumerator) -> Self {
        let replication = &ctx.settings.replication;
        let locator = ReplicaLocator::new(
            ctx.client.clone(),
            ctx.health.clone(),
            replication.locate_concurrency,
            replication.query_timeout(),
        );
        Self {
            ctx,
            queue,
            locator,
            enumerator,
        }
    }

    fn kind(&self) -> ChunkKind {
        self.enumerator.kind()
    }

    /// Work through the whole lane, or until the stop signal is raised
    pub async fn run(mut self) -> LaneSummary {
        let kind = self.kind();
        let lane = self.enumerator.lane();
        let mut summary = LaneSummary::default();
        tracing::debug!("{} lane {} starting", kind, lane);

        'lane: loop {
            let offset = self.enumerator.offset();
            let batch = match self.enumerator.next_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("{} lane {} failed at offset {}: {}", kind, lane, offset, e);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            for id in batch {
                if self.ctx.stop.is_stopped() {
                    summary.stopped = true;
                    break 'lane;
                }
                summary.scanned += 1;
                match self.scan_chunk(&id).await {
                    ScanOutcome::Sufficient { .. } => {}
                    ScanOutcome::Deficient { .. } => summary.deficient += 1,
                    ScanOutcome::Dropped { .. } => {
                        summary.deficient += 1;
                        summary.stopped = true;
                        break 'lane;
                    }
                }
            }
        }

        tracing::debug!(
            "{} lane {} finished: {} scanned, {} deficient",
            kind,
            lane,
            summary.scanned,
            summary.deficient
        );
        summary
    }

    /// Locate replicas of one chunk and enqueue a task if it is short
    pub async fn scan_chunk(&self, id: &ChunkId) -> ScanOutcome {
        let kind = self.kind();
        let stats = &self.ctx.stats;
        let required = self.ctx.required_replicas();

        let located = self
            .locator
            .locate(id, kind, &self.ctx.query_peers())
            .await;
        let found = located.found();
        stats.processed(kind).inc();

        if found == 0 {
            stats.zero_replicas.inc();
        }
        if found >= required {
            return ScanOutcome::Sufficient { found };
        }
        stats.under_replicated.inc();

        let mut candidates = self.ctx.push_targets(&located.have);
        candidates.shuffle(&mut rand::thread_rng());
        let count = candidates.len();
        tracing::debug!(
            "{} chunk {} has {}/{} replicas, {} candidates",
            kind,
            id,
            found,
            required,
            count
        );

        let Some(task) = InjectionTask::new(*id, kind, candidates, required, found) else {
            return ScanOutcome::Sufficient { found };
        };
        match self.queue.push(task).await {
            Ok(()) => {
                stats.tasks_enqueued.inc();
                ScanOutcome::Deficient {
                    found,
                    candidates: count,
                }
            }
            Err(_) => {
                tracing::warn!("Injection queue closed, dropping {} chunk {}", kind, id);
                ScanOutcome::Dropped { found }
            }
        }
    }
}
