//! In-process peer network
//!
//! Peers are plain sets of chunk ids. Individual peers can be made
//! unreachable, made to reject pushes, or slowed down, which is enough to
//! exercise every failure path of the engine without sockets.

use super::{PeerClient, PeerConnection};
use crate::common::{ChunkId, ChunkKind, Error, Result, SigningIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MemPeer {
    chunks: HashSet<(ChunkKind, ChunkId)>,
    unreachable: bool,
    reject_pushes: bool,
    delay: Option<Duration>,
    queries: u64,
    pushes: u64,
}

#[derive(Clone, Default)]
pub struct MemPeerNetwork {
    peers: Arc<Mutex<HashMap<String, MemPeer>>>,
}

impl MemPeerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, MemPeer>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_peer(&self, address: &str) {
        self.peers().entry(address.to_string()).or_default();
    }

    /// Place a replica on `address`
    pub fn store(&self, address: &str, kind: ChunkKind, id: ChunkId) {
        self.peers()
            .entry(address.to_string())
            .or_default()
            .chunks
            .insert((kind, id));
    }

    /// Peers holding a replica, sorted
    pub fn holders(&self, kind: ChunkKind, id: &ChunkId) -> Vec<String> {
        let mut holders: Vec<String> = self
            .peers()
            .iter()
            .filter(|(_, p)| p.chunks.contains(&(kind, *id)))
            .map(|(a, _)| a.clone())
            .collect();
        holders.sort();
        holders
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        self.peers().entry(address.to_string()).or_default().unreachable = unreachable;
    }

    pub fn set_reject_pushes(&self, address: &str, reject: bool) {
        self.peers().entry(address.to_string()).or_default().reject_pushes = reject;
    }

    /// Delay every RPC to `address`
    pub fn set_delay(&self, address: &str, delay: Duration) {
        self.peers().entry(address.to_string()).or_default().delay = Some(delay);
    }

    pub fn query_count(&self, address: &str) -> u64 {
        self.peers().get(address).map_or(0, |p| p.queries)
    }

    pub fn push_count(&self, address: &str) -> u64 {
        self.peers().get(address).map_or(0, |p| p.pushes)
    }

    pub fn total_pushes(&self) -> u64 {
        self.peers().values().map(|p| p.pushes).sum()
    }

    fn delay_of(&self, address: &str) -> Option<Duration> {
        self.peers().get(address).and_then(|p| p.delay)
    }

    fn check_reachable(&self, address: &str) -> Result<()> {
        match self.peers().get(address) {
            None => Err(Error::ConnectionFailed(format!("unknown peer {}", address))),
            Some(p) if p.unreachable => {
                Err(Error::ConnectionFailed(format!("{} is unreachable", address)))
            }
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl PeerClient for MemPeerNetwork {
    async fn connect(&self, address: &str) -> Result<Box<dyn PeerConnection>> {
        self.check_reachable(address)?;
        Ok(Box::new(MemConnection {
            address: address.to_string(),
            network: self.clone(),
        }))
    }
}

struct MemConnection {
    address: String,
    network: MemPeerNetwork,
}

impl MemConnection {
    async fn round_trip(&self) -> Result<()> {
        if let Some(delay) = self.network.delay_of(&self.address) {
            tokio::time::sleep(delay).await;
        }
        self.network.check_reachable(&self.address)
    }
}

#[async_trait]
impl PeerConnection for MemConnection {
    async fn has_chunk(&mut self, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        self.round_trip().await?;
        let mut peers = self.network.peers();
        let peer = peers
            .get_mut(&self.address)
            .ok_or_else(|| Error::ConnectionFailed(self.address.clone()))?;
        peer.queries += 1;
        Ok(peer.chunks.contains(&(kind, *id)))
    }

    async fn push_chunk(
        &mut self,
        _identity: &SigningIdentity,
        id: &ChunkId,
        kind: ChunkKind,
        data: Bytes,
    ) -> Result<()> {
        self.round_trip().await?;
        if !id.matches(&data) {
            return Err(Error::Rejected {
                peer: self.address.clone(),
                reason: "content does not match hash".into(),
            });
        }
        let mut peers = self.network.peers();
        let peer = peers
            .get_mut(&self.address)
            .ok_or_else(|| Error::ConnectionFailed(self.address.clone()))?;
        if peer.reject_pushes {
            return Err(Error::Rejected {
                peer: self.address.clone(),
                reason: "push refused".into(),
            });
        }
        peer.pushes += 1;
        peer.chunks.insert((kind, *id));
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.round_trip().await
    }
}
