//! Peer health tracking
//!
//! Each peer collects failure tokens (one per failed query or push) and
//! success tokens. Once enough success tokens pile up they are traded in for
//! one failure token, so a peer that failed once has to succeed
//! `redemption_threshold` times before that failure is forgiven. A peer at
//! or above `failure_cutoff` failure tokens is not offered new work.

use crate::common::HealthConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Counters of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub address: String,
    pub failure_tokens: u64,
    pub success_tokens: u64,
    pub eligible: bool,
}

pub struct PeerHealthTracker {
    config: HealthConfig,
    failures: Mutex<HashMap<String, u64>>,
    successes: Mutex<HashMap<String, u64>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl PeerHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
            successes: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, peer: &str) {
        let threshold = self.config.redemption_threshold.max(1);
        let redeem = {
            let mut successes = locked(&self.successes);
            let tokens = successes.entry(peer.to_string()).or_insert(0);
            *tokens += 1;
            if self.config.enabled && *tokens >= threshold {
                *tokens -= threshold;
                true
            } else {
                false
            }
        };

        let mut failures = locked(&self.failures);
        let tokens = failures.entry(peer.to_string()).or_insert(0);
        if redeem && *tokens > 0 {
            *tokens -= 1;
            tracing::debug!(peer, failure_tokens = *tokens, "Peer redeemed a failure token");
        }
    }

    pub fn record_failure(&self, peer: &str, cause: &str) {
        let mut failures = locked(&self.failures);
        let tokens = failures.entry(peer.to_string()).or_insert(0);
        *tokens += 1;
        tracing::debug!(peer, failure_tokens = *tokens, cause, "Peer failure recorded");
        if *tokens == self.config.failure_cutoff && self.config.enabled {
            tracing::warn!("Peer {} reached {} failures and is now excluded", peer, tokens);
        }
    }

    /// Is `peer` worth offering new work right now?
    pub fn is_eligible(&self, peer: &str) -> bool {
        !self.config.enabled || self.failure_tokens(peer) < self.config.failure_cutoff
    }

    pub fn failure_tokens(&self, peer: &str) -> u64 {
        locked(&self.failures).get(peer).copied().unwrap_or(0)
    }

    pub fn success_tokens(&self, peer: &str) -> u64 {
        locked(&self.successes).get(peer).copied().unwrap_or(0)
    }

    /// Peers contacted so far, sorted by address
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let failures = locked(&self.failures).clone();
        let successes = locked(&self.successes).clone();

        let mut merged: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for (peer, f) in failures {
            merged.entry(peer).or_default().0 = f;
        }
        for (peer, s) in successes {
            merged.entry(peer).or_default().1 = s;
        }

        merged
            .into_iter()
            .map(|(address, (failure_tokens, success_tokens))| PeerRecord {
                eligible: !self.config.enabled || failure_tokens < self.config.failure_cutoff,
                address,
                failure_tokens,
                success_tokens,
            })
            .collect()
    }

    /// Number of contacted peers currently excluded
    pub fn banned_count(&self) -> usize {
        self.snapshot().iter().filter(|r| !r.eligible).count()
    }
}
