//! Peers: who they are, how to talk to them, and how healthy they look
//!
//! - `PeerDirectory`: known peers with their online / read-only state
//! - `PeerClient` / `PeerConnection`: the RPC seam (existence check, push)
//! - `PeerHealthTracker`: failure/success tokens per peer

pub mod health;
pub mod http;
pub mod memory;

pub use health::{PeerHealthTracker, PeerRecord};
pub use http::HttpPeerClient;
pub use memory::MemPeerNetwork;

use crate::common::{ChunkId, ChunkKind, PeerEntry, Result, SigningIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;

/// A peer as known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub address: String,
    pub online: bool,
    pub read_only: bool,
}

/// Source of the peer set
pub trait PeerDirectory: Send + Sync {
    fn list_known_peers(&self) -> Vec<PeerInfo>;

    fn is_online(&self, address: &str) -> bool;
}

/// Opens connections to peers
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fails with a transport error when the peer cannot be reached
    async fn connect(&self, address: &str) -> Result<Box<dyn PeerConnection>>;
}

/// An open connection to one peer
#[async_trait]
pub trait PeerConnection: Send {
    async fn has_chunk(&mut self, id: &ChunkId, kind: ChunkKind) -> Result<bool>;

    async fn push_chunk(
        &mut self,
        identity: &SigningIdentity,
        id: &ChunkId,
        kind: ChunkKind,
        data: Bytes,
    ) -> Result<()>;

    /// Liveness probe
    async fn ping(&mut self) -> Result<()>;
}

/// Peer directory built from configuration, with online state updated by
/// probes
pub struct StaticPeerDirectory {
    peers: RwLock<Vec<PeerInfo>>,
}

impl StaticPeerDirectory {
    /// Every configured peer starts out online
    pub fn new(entries: &[PeerEntry]) -> Self {
        let peers = entries
            .iter()
            .map(|e| PeerInfo {
                address: e.address.clone(),
                online: true,
                read_only: e.read_only,
            })
            .collect();
        Self {
            peers: RwLock::new(peers),
        }
    }

    pub fn set_online(&self, address: &str, online: bool) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(peer) = peers.iter_mut().find(|p| p.address == address) {
            if peer.online != online {
                tracing::info!(
                    "Peer {} is now {}",
                    address,
                    if online { "online" } else { "offline" }
                );
            }
            peer.online = online;
        }
    }

    /// Ping every peer and update its online flag. Returns the number online.
    pub async fn probe(&self, client: &dyn PeerClient, timeout: Duration) -> usize {
        let addresses: Vec<String> = self
            .list_known_peers()
            .into_iter()
            .map(|p| p.address)
            .collect();

        let mut online = 0;
        for address in addresses {
            let result = tokio::time::timeout(timeout, async {
                let mut conn = client.connect(&address).await?;
                conn.ping().await
            })
            .await;
            let up = matches!(result, Ok(Ok(())));
            if !up {
                tracing::debug!("Probe of {} failed", address);
            }
            self.set_online(&address, up);
            online += usize::from(up);
        }
        online
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn list_known_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_online(&self, address: &str) -> bool {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.address == address && p.online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory() {
        let dir = StaticPeerDirectory::new(&[
            PeerEntry::new("http://a"),
            PeerEntry {
                address: "http://b".into(),
                read_only: true,
            },
        ]);
        let peers = dir.list_known_peers();
        assert_eq!(peers.len(), 2);
        assert!(peers[1].read_only);
        assert!(dir.is_online("http://a"));

        dir.set_online("http://a", false);
        assert!(!dir.is_online("http://a"));
        assert!(!dir.is_online("http://unknown"));
    }

    #[tokio::test]
    async fn test_probe_marks_unreachable_offline() {
        let network = MemPeerNetwork::new();
        network.add_peer("http://a");
        network.add_peer("http://b");
        network.set_unreachable("http://b", true);

        let dir = StaticPeerDirectory::new(&[PeerEntry::new("http://a"), PeerEntry::new("http://b")]);
        let online = dir.probe(&network, Duration::from_secs(1)).await;

        assert_eq!(online, 1);
        assert!(dir.is_online("http://a"));
        assert!(!dir.is_online("http://b"));
    }
}
