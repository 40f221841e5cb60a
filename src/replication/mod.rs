//! The replication engine
//!
//! - `enumerator`: lane-partitioned walk over local chunk ids
//! - `locator`: bounded, time-limited existence checks across peers
//! - `scanner`: turns short chunks into injection tasks
//! - `queue`: bounded queue between scanners and injectors
//! - `injector`: pushes replicas and writes the audit rows
//! - `run`: wires one pass together

pub mod context;
pub mod enumerator;
pub mod injector;
pub mod locator;
pub mod queue;
pub mod run;
pub mod scanner;
pub mod task;

pub use context::{RunContext, RunSettings, StopSignal};
pub use enumerator::ChunkEnumerator;
pub use injector::{ChunkInjector, InjectionOutcome};
pub use locator::{Located, ReplicaLocator};
pub use queue::InjectionQueue;
pub use run::{write_progress, ProgressSnapshot, ReplicationReport, Replicator};
pub use scanner::{LaneSummary, ReplicationScanner, ScanOutcome};
pub use task::InjectionTask;
