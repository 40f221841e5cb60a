//! Run statistics
//!
//! Counters shared by scanner lanes and injector workers. One `RunStats`
//! lives in each run context; nothing here is process-global.

use crate::common::ChunkKind;
use crate::common::utils::percent;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, n: u64) {
        self.value.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Running totals of one replication pass
#[derive(Debug)]
pub struct RunStats {
    started: Instant,
    pub data_total: Counter,
    pub meta_total: Counter,
    pub data_processed: Counter,
    pub meta_processed: Counter,
    /// Chunks for which no peer reported a replica
    pub zero_replicas: Counter,
    /// Chunks found below the replica target
    pub under_replicated: Counter,
    pub tasks_enqueued: Counter,
    pub tasks_completed: Counter,
    /// Successful pushes
    pub chunks_injected: Counter,
    pub bytes_injected: Counter,
    /// Failed pushes
    pub push_failures: Counter,
    /// Tasks that ended below target
    pub still_under_replicated: Counter,
    /// Enumerated chunks that could not be read back locally
    pub local_read_anomalies: Counter,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            data_total: Counter::new(),
            meta_total: Counter::new(),
            data_processed: Counter::new(),
            meta_processed: Counter::new(),
            zero_replicas: Counter::new(),
            under_replicated: Counter::new(),
            tasks_enqueued: Counter::new(),
            tasks_completed: Counter::new(),
            chunks_injected: Counter::new(),
            bytes_injected: Counter::new(),
            push_failures: Counter::new(),
            still_under_replicated: Counter::new(),
            local_read_anomalies: Counter::new(),
        }
    }

    pub fn set_total(&self, kind: ChunkKind, total: u64) {
        match kind {
            ChunkKind::Data => self.data_total.set(total),
            ChunkKind::Meta => self.meta_total.set(total),
        }
    }

    pub fn processed(&self, kind: ChunkKind) -> &Counter {
        match kind {
            ChunkKind::Data => &self.data_processed,
            ChunkKind::Meta => &self.meta_processed,
        }
    }

    /// Processed chunks over the local corpus size, both kinds together
    pub fn percent_complete(&self) -> f64 {
        percent(
            self.data_processed.get() + self.meta_processed.get(),
            self.data_total.get() + self.meta_total.get(),
        )
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            elapsed_secs: self.started.elapsed().as_secs(),
            data_total: self.data_total.get(),
            meta_total: self.meta_total.get(),
            data_processed: self.data_processed.get(),
            meta_processed: self.meta_processed.get(),
            percent_complete: self.percent_complete(),
            zero_replicas: self.zero_replicas.get(),
            under_replicated: self.under_replicated.get(),
            tasks_enqueued: self.tasks_enqueued.get(),
            tasks_completed: self.tasks_completed.get(),
            chunks_injected: self.chunks_injected.get(),
            bytes_injected: self.bytes_injected.get(),
            push_failures: self.push_failures.get(),
            still_under_replicated: self.still_under_replicated.get(),
            local_read_anomalies: self.local_read_anomalies.get(),
        }
    }
}

/// Point-in-time copy of `RunStats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: u64,
    pub data_total: u64,
    pub meta_total: u64,
    pub data_processed: u64,
    pub meta_processed: u64,
    pub percent_complete: f64,
    pub zero_replicas: u64,
    pub under_replicated: u64,
    pub tasks_enqueued: u64,
    pub tasks_completed: u64,
    pub chunks_injected: u64,
    pub bytes_injected: u64,
    pub push_failures: u64,
    pub still_under_replicated: u64,
    pub local_read_anomalies: u64,
}

impl StatsSnapshot {
    /// One-line console summary
    pub fn summary_line(&self) -> String {
        format!(
            "{:.1}% processed (data {}/{}, meta {}/{}), zero replicas: {}, under-replicated: {}, injected: {}, push failures: {}",
            self.percent_complete,
            self.data_processed,
            self.data_total,
            self.meta_processed,
            self.meta_total,
            self.zero_replicas,
            self.under_replicated,
            self.chunks_injected,
            self.push_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
        c.set(2);
        assert_eq!(c.get(), 2);
    }

    #[test]
    fn test_percent_complete() {
        let stats = RunStats::new();
        assert_eq!(stats.percent_complete(), 100.0);

        stats.set_total(ChunkKind::Data, 6);
        stats.set_total(ChunkKind::Meta, 2);
        stats.processed(ChunkKind::Data).add(3);
        stats.processed(ChunkKind::Meta).inc();
        assert_eq!(stats.percent_complete(), 50.0);
    }

    #[test]
    fn test_snapshot_summary() {
        let stats = RunStats::new();
        stats.set_total(ChunkKind::Data, 4);
        stats.data_processed.add(4);
        stats.zero_replicas.inc();
        stats.chunks_injected.add(2);

        let snap = stats.snapshot();
        assert_eq!(snap.data_processed, 4);
        let line = snap.summary_line();
        assert!(line.starts_with("100.0% processed"));
        assert!(line.contains("zero replicas: 1"));
        assert!(line.contains("injected: 2"));
    }
}
