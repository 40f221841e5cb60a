//! Injector workers: push missing replicas to peers

use super::context::RunContext;
use super::queue::InjectionQueue;
use super::task::InjectionTask;
use crate::common::{Error, ExceptionRecord, FailureRecord, Result};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

/// How one task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Target reached
    Satisfied { found: usize, pushed: usize },
    /// Candidates exhausted below target
    Short { found: usize, pushed: usize },
    /// Chunk could not be read locally
    Unreadable,
}

pub struct ChunkInjector {
    ctx: Arc<RunContext>,
    queue: Arc<InjectionQueue>,
    worker: usize,
}

impl ChunkInjector {
    pub fn new(ctx: Arc<RunContext>, queue: Arc<InjectionQueue>, worker: usize) -> Self {
        Self { ctx, queue, worker }
    }

    /// Drain the queue until it is closed and empty. Returns the number of
    /// tasks handled.
    pub async fn run(self) -> u64 {
        let mut handled = 0;
        while let Some(task) = self.queue.pop().await {
            self.inject(&task).await;
            self.ctx.stats.tasks_completed.inc();
            handled += 1;
        }
        tracing::debug!("Injector {} done after {} tasks", self.worker, handled);
        handled
    }

    pub async fn inject(&self, task: &InjectionTask) -> InjectionOutcome {
        let kind = task.kind();
        let id = task.chunk();
        let stats = &self.ctx.stats;

        let data = match self.ctx.store.read_chunk(id, kind) {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::warn!("{} chunk {} vanished from local storage", kind, id);
                stats.local_read_anomalies.inc();
                return InjectionOutcome::Unreadable;
            }
            Err(e) => {
                tracing::warn!("{} chunk {} unreadable: {}", kind, id, e);
                stats.local_read_anomalies.inc();
                return InjectionOutcome::Unreadable;
            }
        };

        let required = task.required();
        let mut found = task.found();
        let mut pushed = 0;

        for peer in task.candidates() {
            if found >= required {
                break;
            }
            if !self.ctx.directory.is_online(peer) {
                tracing::debug!("Skipping offline peer {}", peer);
                continue;
            }

            match self.push(peer, task, data.clone()).await {
                Ok(()) => {
                    found += 1;
                    pushed += 1;
                    stats.chunks_injected.inc();
                    stats.bytes_injected.add(data.len() as u64);
                    self.ctx.health.record_success(peer);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.ctx.health.record_failure(peer, &message);
                    stats.push_failures.inc();
                    let record = ExceptionRecord {
                        kind,
                        required,
                        found,
                        peer: peer.clone(),
                        timestamp: Utc::now(),
                        message,
                        chunk: *id,
                    };
                    if let Err(e) = self.ctx.audit.record_exception(&record) {
                        tracing::error!("Failed to write exception row: {}", e);
                    }
                }
            }
        }

        if found >= required {
            return InjectionOutcome::Satisfied { found, pushed };
        }

        stats.still_under_replicated.inc();
        tracing::info!(
            "{} chunk {} still under-replicated: {}/{}",
            kind,
            id,
            found,
            required
        );
        let record = FailureRecord {
            expected: required,
            found,
            kind,
            chunk: *id,
        };
        if let Err(e) = self.ctx.audit.record_failure(&record) {
            tracing::error!("Failed to write failure row: {}", e);
        }
        InjectionOutcome::Short { found, pushed }
    }

    async fn push(&self, peer: &str, task: &InjectionTask, data: Bytes) -> Result<()> {
        let timeout = self.ctx.settings.replication.push_timeout();
        let round_trip = async {
            let mut conn = self.ctx.client.connect(peer).await?;
            conn.push_chunk(&self.ctx.identity, task.chunk(), task.kind(), data)
                .await
        };
        match tokio::time::timeout(timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "push to {} after {:?}",
                peer, timeout
            ))),
        }
    }
}
