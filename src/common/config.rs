//! Configuration for chunkrep runs
//!
//! Layered as: optional TOML file, then `CHUNKREP__*` environment variables,
//! then command-line flags applied by the binary.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CHUNKREP";

/// Top-level configuration of a repair run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Root of the local chunk store
    #[serde(default)]
    pub chunk_root: PathBuf,

    /// Additional directories holding data chunks
    #[serde(default)]
    pub extra_data_dirs: Vec<PathBuf>,

    /// Identity file used to sign pushes
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Passphrase unlocking the identity file
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,

    /// JSON progress snapshot, rewritten periodically
    #[serde(default)]
    pub progress_file: Option<PathBuf>,

    /// Per-peer push failures
    #[serde(default)]
    pub exception_file: Option<PathBuf>,

    /// Chunks left under-replicated
    #[serde(default)]
    pub failure_file: Option<PathBuf>,

    /// Known peers
    #[serde(default)]
    pub peers: Vec<PeerEntry>,

    /// Explicit "servers to use" set. When non-empty it replaces the known
    /// peer set for existence checks and fixes the replica target to its size.
    #[serde(default)]
    pub use_peers: Vec<String>,

    /// Peers excluded from the run entirely
    #[serde(default)]
    pub ban_peers: Vec<String>,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub health: HealthConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A peer as listed in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub address: String,

    /// Read-only peers are queried but never pushed to
    #[serde(default)]
    pub read_only: bool,
}

impl PeerEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            read_only: false,
        }
    }
}

/// Pool sizes, batch sizes and timeouts of the replication engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Default replication target
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Enumeration lanes over data chunks
    #[serde(default = "default_lanes")]
    pub data_lanes: usize,

    /// Enumeration lanes over metadata chunks
    #[serde(default = "default_lanes")]
    pub meta_lanes: usize,

    /// Chunk ids fetched per enumeration batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capacity of the injection queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Injection workers draining the queue
    #[serde(default = "default_injector_workers")]
    pub injector_workers: usize,

    /// Concurrent existence queries per chunk
    #[serde(default = "default_locate_concurrency")]
    pub locate_concurrency: usize,

    /// Timeout for connect + has_chunk
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    /// Timeout for connect + push_chunk
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Interval between progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

fn default_replicas() -> usize {
    3
}
fn default_lanes() -> usize {
    3
}
fn default_batch_size() -> usize {
    1000
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_injector_workers() -> usize {
    3
}
fn default_locate_concurrency() -> usize {
    16
}
fn default_query_timeout() -> u64 {
    10_000
}
fn default_push_timeout() -> u64 {
    30_000
}
fn default_progress_interval() -> u64 {
    10
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            data_lanes: default_lanes(),
            meta_lanes: default_lanes(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            injector_workers: default_injector_workers(),
            locate_concurrency: default_locate_concurrency(),
            query_timeout_ms: default_query_timeout(),
            push_timeout_ms: default_push_timeout(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

impl ReplicationConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("replicas", self.replicas),
            ("data_lanes", self.data_lanes),
            ("meta_lanes", self.meta_lanes),
            ("batch_size", self.batch_size),
            ("queue_capacity", self.queue_capacity),
            ("injector_workers", self.injector_workers),
            ("locate_concurrency", self.locate_concurrency),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be at least 1", name)));
            }
        }
        if self.query_timeout_ms == 0 || self.push_timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Peer banning policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// When false every peer stays eligible
    #[serde(default = "default_ban_enabled")]
    pub enabled: bool,

    /// Failure tokens at which a peer stops being eligible
    #[serde(default = "default_failure_cutoff")]
    pub failure_cutoff: u64,

    /// Success tokens traded in for one failure token
    #[serde(default = "default_redemption_threshold")]
    pub redemption_threshold: u64,
}

fn default_ban_enabled() -> bool {
    true
}
fn default_failure_cutoff() -> u64 {
    20
}
fn default_redemption_threshold() -> u64 {
    10
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_ban_enabled(),
            failure_cutoff: default_failure_cutoff(),
            redemption_threshold: default_redemption_threshold(),
        }
    }
}

/// Command-line override of the form `use:<peer>`, `ban:<peer>` or `data:<dir>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Override {
    Use(String),
    Ban(String),
    DataDir(PathBuf),
}

impl Override {
    pub fn parse(arg: &str) -> Result<Self> {
        let (tag, value) = arg
            .split_once(':')
            .ok_or_else(|| Error::InvalidConfig(format!("malformed override: {}", arg)))?;
        if value.is_empty() {
            return Err(Error::InvalidConfig(format!("empty override value: {}", arg)));
        }
        match tag {
            "use" => Ok(Override::Use(value.to_string())),
            "ban" => Ok(Override::Ban(value.to_string())),
            "data" => Ok(Override::DataDir(PathBuf::from(value))),
            _ => Err(Error::InvalidConfig(format!("unknown override: {}", tag))),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            chunk_root: PathBuf::new(),
            extra_data_dirs: Vec::new(),
            identity_file: None,
            passphrase: None,
            progress_file: None,
            exception_file: None,
            failure_file: None,
            peers: Vec::new(),
            use_peers: Vec::new(),
            ban_peers: Vec::new(),
            replication: ReplicationConfig::default(),
            health: HealthConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl RepairConfig {
    /// Load from an optional TOML file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let config: RepairConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn apply_override(&mut self, o: Override) {
        match o {
            Override::Use(peer) => self.use_peers.push(peer),
            Override::Ban(peer) => self.ban_peers.push(peer),
            Override::DataDir(dir) => self.extra_data_dirs.push(dir),
        }
    }

    /// Replica target for this run: the size of the explicit peer set when
    /// one is configured, the default target otherwise.
    pub fn required_replicas(&self) -> usize {
        let use_set = self.use_set();
        if use_set.is_empty() {
            self.replication.replicas
        } else {
            use_set.len()
        }
    }

    /// Known peers minus banned ones. Peers named only in the use set are
    /// added as writable peers.
    pub fn effective_peers(&self) -> Vec<PeerEntry> {
        let banned: BTreeSet<&str> = self.ban_peers.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        let mut peers = Vec::new();
        let named = self
            .peers
            .iter()
            .cloned()
            .chain(self.use_peers.iter().map(PeerEntry::new));
        for peer in named {
            if banned.contains(peer.address.as_str()) || !seen.insert(peer.address.clone()) {
                continue;
            }
            peers.push(peer);
        }
        peers
    }

    /// Deduplicated explicit peer set, minus banned peers
    pub fn use_set(&self) -> Vec<String> {
        let banned: BTreeSet<&str> = self.ban_peers.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        self.use_peers
            .iter()
            .filter(|p| !banned.contains(p.as_str()) && seen.insert(p.as_str()))
            .cloned()
            .collect()
    }

    /// Pre-flight checks. Every failure here aborts the run before scanning.
    pub fn validate(&self) -> Result<()> {
        self.replication.validate()?;

        if self.chunk_root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("chunk root is required".into()));
        }
        if !self.chunk_root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "chunk root is not a directory: {}",
                self.chunk_root.display()
            )));
        }
        for dir in &self.extra_data_dirs {
            if !dir.is_dir() {
                return Err(Error::InvalidConfig(format!(
                    "extra data directory is not a directory: {}",
                    dir.display()
                )));
            }
        }

        let identity = self
            .identity_file
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("identity file is required".into()))?;
        if !identity.is_file() {
            return Err(Error::InvalidConfig(format!(
                "identity file not found: {}",
                identity.display()
            )));
        }
        if self.passphrase.is_none() {
            return Err(Error::InvalidConfig("passphrase is required".into()));
        }

        for (name, path) in [
            ("progress file", &self.progress_file),
            ("exception file", &self.exception_file),
            ("failure file", &self.failure_file),
        ] {
            let path = path
                .as_ref()
                .ok_or_else(|| Error::InvalidConfig(format!("{} is required", name)))?;
            if path.exists() {
                return Err(Error::OutputExists(path.display().to_string()));
            }
        }

        if !self.use_peers.is_empty() && self.use_set().is_empty() {
            return Err(Error::InvalidConfig("use set is empty after bans".into()));
        }

        let peers = self.effective_peers();
        if peers.is_empty() {
            return Err(Error::InvalidConfig("no peers configured".into()));
        }
        for peer in &peers {
            reqwest::Url::parse(&peer.address).map_err(|e| {
                Error::InvalidConfig(format!("invalid peer address {}: {}", peer.address, e))
            })?;
        }

        Ok(())
    }
}
