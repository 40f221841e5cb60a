//! Per-run state shared by every lane and worker

use crate::common::{
    HealthConfig, RepairConfig, ReplicationAuditLog, ReplicationConfig, RunStats,
    SigningIdentity,
};
use crate::peer::{PeerClient, PeerDirectory, PeerHealthTracker};
use crate::storage::ChunkStore;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative stop flag. Cloning shares the flag.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // Only fails if the sender is gone, and we hold it
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Run parameters resolved from configuration
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub replication: ReplicationConfig,
    pub health: HealthConfig,
    /// Explicit peer set; replaces the directory for existence checks
    pub use_peers: Option<Vec<String>>,
    pub required_replicas: usize,
    pub progress_file: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_config(config: &RepairConfig) -> Self {
        let use_set = config.use_set();
        Self {
            replication: config.replication.clone(),
            health: config.health.clone(),
            required_replicas: config.required_replicas(),
            use_peers: (!use_set.is_empty()).then_some(use_set),
            progress_file: config.progress_file.clone(),
        }
    }

    pub fn is_use_peer(&self, address: &str) -> bool {
        self.use_peers
            .as_ref()
            .map_or(true, |peers| peers.iter().any(|p| p == address))
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        let replication = ReplicationConfig::default();
        Self {
            required_replicas: replication.replicas,
            replication,
            health: HealthConfig::default(),
            use_peers: None,
            progress_file: None,
        }
    }
}

/// Everything one replication pass needs. Built once per run and shared
/// behind an `Arc`.
pub struct RunContext {
    pub store: Arc<dyn ChunkStore>,
    pub client: Arc<dyn PeerClient>,
    pub directory: Arc<dyn PeerDirectory>,
    pub identity: SigningIdentity,
    pub health: Arc<PeerHealthTracker>,
    pub stats: RunStats,
    pub audit: ReplicationAuditLog,
    pub settings: RunSettings,
    pub stop: StopSignal,
}

impl RunContext {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        client: Arc<dyn PeerClient>,
        directory: Arc<dyn PeerDirectory>,
        identity: SigningIdentity,
        audit: ReplicationAuditLog,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            client,
            directory,
            identity,
            health: Arc::new(PeerHealthTracker::new(settings.health.clone())),
            stats: RunStats::new(),
            audit,
            settings,
            stop: StopSignal::new(),
        }
    }

    /// Use a stop signal owned by the caller
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn required_replicas(&self) -> usize {
        self.settings.required_replicas
    }

    /// Peers asked whether they hold a chunk: the explicit set when one is
    /// configured, otherwise every known peer that is online.
    pub fn query_peers(&self) -> Vec<String> {
        match &self.settings.use_peers {
            Some(peers) => peers.clone(),
            None => self
                .directory
                .list_known_peers()
                .into_iter()
                .filter(|p| p.online)
                .map(|p| p.address)
                .collect(),
        }
    }

    /// Peers a chunk may be pushed to: online, writable, eligible, not
    /// already holding it, and inside the explicit set if there is one.
    /// Returned in directory order.
    pub fn push_targets(&self, have: &[String]) -> Vec<String> {
        let have: HashSet<&str> = have.iter().map(String::as_str).collect();
        self.directory
            .list_known_peers()
            .into_iter()
            .filter(|p| p.online && !p.read_only)
            .filter(|p| !have.contains(p.address.as_str()))
            .filter(|p| self.settings.is_use_peer(&p.address))
            .filter(|p| self.health.is_eligible(&p.address))
            .map(|p| p.address)
            .collect()
    }
}
