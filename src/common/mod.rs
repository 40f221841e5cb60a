//! Common utilities and types shared across chunkrep

pub mod audit;
pub mod config;
pub mod error;
pub mod hash;
pub mod identity;
pub mod metrics;
pub mod utils;

pub use audit::{ExceptionRecord, FailureRecord, ReplicationAuditLog};
pub use config::{HealthConfig, Override, PeerEntry, RepairConfig, ReplicationConfig};
pub use error::{Error, Result};
pub use hash::{blake3_hash, ChunkId, ChunkKind, HASH_LEN};
pub use identity::{IdentityFile, SigningIdentity};
pub use metrics::{Counter, RunStats, StatsSnapshot};
pub use utils::{format_bytes, parse_duration, percent};
