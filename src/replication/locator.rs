//! Replica location: which peers already hold a chunk

use crate::common::{ChunkId, ChunkKind, Error, Result};
use crate::peer::{PeerClient, PeerHealthTracker};
use futures_util::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// Partition of the queried peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Located {
    pub have: Vec<String>,
    pub lack: Vec<String>,
}

impl Located {
    pub fn found(&self) -> usize {
        self.have.len()
    }
}

pub struct ReplicaLocator {
    client: Arc<dyn PeerClient>,
    health: Arc<PeerHealthTracker>,
    concurrency: usize,
    timeout: Duration,
}

impl ReplicaLocator {
    pub fn new(
        client: Arc<dyn PeerClient>,
        health: Arc<PeerHealthTracker>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            health,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Ask every candidate whether it holds `id`.
    ///
    /// Peers that fail or time out land in neither list. Every completed
    /// round trip counts as a success on the peer's health, whatever the
    /// answer.
    pub async fn locate(&self, id: &ChunkId, kind: ChunkKind, candidates: &[String]) -> Located {
        let mut peers = candidates.to_vec();
        peers.shuffle(&mut rand::thread_rng());

        let answers: Vec<(String, Result<bool>)> = stream::iter(peers)
            .map(|peer| async move {
                let answer = self.query(&peer, id, kind).await;
                (peer, answer)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut located = Located::default();
        for (peer, answer) in answers {
            match answer {
                Ok(true) => {
                    self.health.record_success(&peer);
                    located.have.push(peer);
                }
                Ok(false) => {
                    self.health.record_success(&peer);
                    located.lack.push(peer);
                }
                Err(e) => {
                    self.health.record_failure(&peer, &e.to_string());
                }
            }
        }
        located
    }

    async fn query(&self, peer: &str, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        let round_trip = async {
            let mut conn = self.client.connect(peer).await?;
            conn.has_chunk(id, kind).await
        };
        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(answer) => answer,
            Err(_) => Err(Error::Timeout(format!(
                "existence check on {} after {:?}",
                peer, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::HealthConfig;
    use crate::peer::MemPeerNetwork;

    fn peer(n: usize) -> String {
        format!("http://peer-{}", n)
    }

    fn setup(peers: usize) -> (MemPeerNetwork, Arc<PeerHealthTracker>) {
        let network = MemPeerNetwork::new();
        for n in 0..peers {
            network.add_peer(&peer(n));
        }
        (network, Arc::new(PeerHealthTracker::new(HealthConfig::default())))
    }

    #[tokio::test]
    async fn test_partition() {
        let (network, health) = setup(4);
        let id = ChunkId::for_bytes(b"chunk");
        network.store(&peer(1), ChunkKind::Data, id);
        network.store(&peer(3), ChunkKind::Data, id);
        // Same hash under the other kind does not count
        network.store(&peer(0), ChunkKind::Meta, id);

        let locator =
            ReplicaLocator::new(Arc::new(network.clone()), health.clone(), 2, Duration::from_secs(1));
        let peers: Vec<String> = (0..4).map(peer).collect();
        let mut located = locator.locate(&id, ChunkKind::Data, &peers).await;
        located.have.sort();
        located.lack.sort();

        assert_eq!(located.have, vec![peer(1), peer(3)]);
        assert_eq!(located.lack, vec![peer(0), peer(2)]);
        for n in 0..4 {
            assert_eq!(health.success_tokens(&peer(n)), 1);
            assert_eq!(network.query_count(&peer(n)), 1);
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_omitted() {
        let (network, health) = setup(3);
        let id = ChunkId::for_bytes(b"chunk");
        network.store(&peer(0), ChunkKind::Meta, id);
        network.set_unreachable(&peer(2), true);

        let locator =
            ReplicaLocator::new(Arc::new(network), health.clone(), 16, Duration::from_secs(1));
        let peers: Vec<String> = (0..3).map(peer).collect();
        let located = locator.locate(&id, ChunkKind::Meta, &peers).await;

        assert_eq!(located.have, vec![peer(0)]);
        assert_eq!(located.lack, vec![peer(1)]);
        assert_eq!(health.failure_tokens(&peer(2)), 1);
        assert_eq!(health.success_tokens(&peer(2)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peer_times_out() {
        let (network, health) = setup(2);
        let id = ChunkId::for_bytes(b"chunk");
        network.store(&peer(0), ChunkKind::Data, id);
        network.store(&peer(1), ChunkKind::Data, id);
        network.set_delay(&peer(1), Duration::from_secs(60));

        let locator =
            ReplicaLocator::new(Arc::new(network), health.clone(), 16, Duration::from_secs(5));
        let located = locator
            .locate(&id, ChunkKind::Data, &[peer(0), peer(1)])
            .await;

        assert_eq!(located.have, vec![peer(0)]);
        assert!(located.lack.is_empty());
        assert_eq!(health.failure_tokens(&peer(1)), 1);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let (network, health) = setup(0);
        let locator = ReplicaLocator::new(Arc::new(network), health, 16, Duration::from_secs(1));
        let located = locator
            .locate(&ChunkId::for_bytes(b"x"), ChunkKind::Data, &[])
            .await;
        assert_eq!(located, Located::default());
    }
}
