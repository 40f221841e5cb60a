//! # chunkrep
//!
//! Replication repair for a content-addressed chunk store:
//! - Walks every local data and meta chunk in parallel lanes
//! - Asks peers which of them already hold each chunk
//! - Pushes under-replicated chunks to healthy peers until the target is met
//! - Tracks per-peer reputation and stops using peers that keep failing
//! - Records every failed push and every chunk left short in CSV audit files
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   Local chunk store  │   data/ and meta/, hash-named files
//! └──────────┬───────────┘
//!            │ enumerate (lane i of L, batch B)
//!   ┌────────┴─────────┬──────────────┐
//! ┌─▼──────────┐  ┌────▼───────┐  ┌───▼────────┐
//! │ data lane  │  │ data lane  │  │ meta lane  │ ──> ReplicaLocator ──> peers (HEAD)
//! └─────┬──────┘  └────┬───────┘  └───┬────────┘
//!       └──────────────┼──────────────┘
//!                      │ InjectionTask
//!             ┌────────▼─────────┐
//!             │  InjectionQueue  │   bounded, producers wait when full
//!             └────────┬─────────┘
//!         ┌────────────┼────────────┐
//!   ┌─────▼─────┐ ┌────▼──────┐ ┌───▼───────┐
//!   │ injector  │ │ injector  │ │ injector  │ ──> peers (PUT), audit log
//!   └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! ## Usage
//!
//! ### Create an identity
//! ```bash
//! chunkrep identity --user ops --passphrase secret --out ./ops.identity
//! ```
//!
//! ### Repair a store
//! ```bash
//! chunkrep repair \
//!   --chunk-root /srv/chunks \
//!   --identity ./ops.identity --passphrase secret \
//!   --progress-file ./progress.json \
//!   --exception-file ./exceptions.csv \
//!   --failure-file ./failures.csv \
//!   --peer http://10.0.0.2:7000 --peer http://10.0.0.3:7000 --peer http://10.0.0.4:7000
//!
//! # Restrict to two peers (target becomes 2), skip one, add a data dir
//! chunkrep repair ... use:http://10.0.0.2:7000 use:http://10.0.0.3:7000 \
//!   ban:http://10.0.0.9:7000 data:/mnt/extra
//! ```
//!
//! ### Find a chunk
//! ```bash
//! chunkrep locate --hash <hex> --meta --peer http://10.0.0.2:7000
//! ```

pub mod common;
pub mod peer;
pub mod replication;
pub mod storage;

// Re-export commonly used types
pub use common::{ChunkId, ChunkKind, Error, RepairConfig, Result};
pub use replication::{ReplicationReport, Replicator, RunContext};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
