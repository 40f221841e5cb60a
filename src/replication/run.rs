//! One replication pass, end to end
//!
//! ```text
//!   data lanes ─┐                     ┌─ injector 0
//!   meta lanes ─┼─> InjectionQueue ───┼─ injector 1
//!               │   (bounded)         └─ injector N
//!   progress reporter (every interval, and once at the end)
//! ```
//!
//! Lanes are joined first. Only then is the queue closed, so injectors
//! drain everything the lanes produced before the run returns.

use super::context::{RunContext, StopSignal};
use super::enumerator::ChunkEnumerator;
use super::injector::ChunkInjector;
use super::queue::InjectionQueue;
use super::scanner::{LaneSummary, ReplicationScanner};
use crate::common::{ChunkKind, Error, Result, StatsSnapshot};
use crate::peer::PeerRecord;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Final outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationReport {
    pub stats: StatsSnapshot,
    pub exception_rows: u64,
    pub failure_rows: u64,
    pub peers: Vec<PeerRecord>,
    /// The stop signal cut the scan short
    pub stopped: bool,
}

impl ReplicationReport {
    pub fn summary(&self) -> String {
        format!(
            "{}; {} exception rows, {} chunks left under-replicated{}",
            self.stats.summary_line(),
            self.exception_rows,
            self.failure_rows,
            if self.stopped { " (stopped early)" } else { "" }
        )
    }
}

/// Contents of the progress file
#[derive(Debug, Serialize)]
pub struct ProgressSnapshot {
    pub timestamp: String,
    pub stats: StatsSnapshot,
    pub queue_depth: usize,
    pub peers: Vec<PeerRecord>,
    pub done: bool,
}

impl ProgressSnapshot {
    fn capture(ctx: &RunContext, queue: &InjectionQueue, done: bool) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stats: ctx.stats.snapshot(),
            queue_depth: queue.len(),
            peers: ctx.health.snapshot(),
            done,
        }
    }
}

/// Replace `path` with the JSON form of `snapshot`
pub async fn write_progress(path: &Path, snapshot: &ProgressSnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn report_progress(ctx: &RunContext, queue: &InjectionQueue, done: bool) {
    let snapshot = ProgressSnapshot::capture(ctx, queue, done);
    tracing::info!("{}", snapshot.stats.summary_line());
    if let Some(path) = &ctx.settings.progress_file {
        if let Err(e) = write_progress(path, &snapshot).await {
            tracing::warn!("Failed to write progress file {}: {}", path.display(), e);
        }
    }
}

/// Runs replication passes, one at a time
#[derive(Default)]
pub struct Replicator {
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Scan every local chunk and repair the under-replicated ones.
    ///
    /// Fails with `AlreadyRunning` if a pass is in progress on this
    /// replicator; per-chunk and per-peer errors never fail the run.
    pub async fn run(&self, ctx: Arc<RunContext>) -> Result<ReplicationReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let replication = &ctx.settings.replication;
        for kind in ChunkKind::ALL {
            ctx.stats.set_total(kind, ctx.store.total_count(kind)?);
        }
        tracing::info!(
            "Starting replication: {} data and {} meta chunks, target {} replicas",
            ctx.stats.data_total.get(),
            ctx.stats.meta_total.get(),
            ctx.required_replicas()
        );

        let queue = Arc::new(InjectionQueue::new(replication.queue_capacity));

        let workers: Vec<JoinHandle<u64>> = (0..replication.injector_workers)
            .map(|n| {
                let injector = ChunkInjector::new(ctx.clone(), queue.clone(), n);
                tokio::spawn(injector.run().instrument(tracing::info_span!("injector", worker = n)))
            })
            .collect();

        let mut lanes: Vec<JoinHandle<LaneSummary>> = Vec::new();
        for (kind, count) in [
            (ChunkKind::Data, replication.data_lanes),
            (ChunkKind::Meta, replication.meta_lanes),
        ] {
            for lane in 0..count {
                let enumerator = ChunkEnumerator::new(
                    ctx.store.clone(),
                    kind,
                    lane,
                    count,
                    replication.batch_size,
                );
                let scanner = ReplicationScanner::new(ctx.clone(), queue.clone(), enumerator);
                let span = tracing::info_span!("lane", %kind, lane);
                lanes.push(tokio::spawn(scanner.run().instrument(span)));
            }
        }

        let reporter_done = StopSignal::new();
        let reporter = tokio::spawn(progress_loop(
            ctx.clone(),
            queue.clone(),
            replication.progress_interval(),
            reporter_done.clone(),
        ));

        let mut stopped = false;
        for lane in lanes {
            match lane.await {
                Ok(summary) => stopped |= summary.stopped,
                Err(e) => tracing::error!("Scanner lane panicked: {}", e),
            }
        }
        queue.close();
        tracing::debug!("All lanes finished, draining {} queued tasks", queue.len());

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Injector worker panicked: {}", e);
            }
        }

        reporter_done.stop();
        if let Err(e) = reporter.await {
            tracing::error!("Progress reporter panicked: {}", e);
        }
        report_progress(&ctx, &queue, true).await;

        let report = ReplicationReport {
            stats: ctx.stats.snapshot(),
            exception_rows: ctx.audit.exception_rows(),
            failure_rows: ctx.audit.failure_rows(),
            peers: ctx.health.snapshot(),
            stopped,
        };
        tracing::info!(
            "Replication finished: {} ({} peers excluded)",
            report.summary(),
            ctx.health.banned_count()
        );
        Ok(report)
    }
}

async fn progress_loop(
    ctx: Arc<RunContext>,
    queue: Arc<InjectionQueue>,
    period: Duration,
    done: StopSignal,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => report_progress(&ctx, &queue, false).await,
            _ = done.stopped() => break,
        }
    }
}
