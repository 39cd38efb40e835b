//! Online peer registry rebuilt from `drones:list` polling

use super::protocol::PeerStatus;
use std::collections::BTreeMap;

/// Peers the signaling server currently reports as online
///
/// Only entries with status `connected` are kept. Staleness is bounded by the
/// poll interval.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<String, PeerStatus>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry with a fresh server snapshot
    ///
    /// Returns true when the set of online peer ids changed.
    pub fn apply_snapshot(&mut self, snapshot: Vec<PeerStatus>) -> bool {
        let next: BTreeMap<String, PeerStatus> = snapshot
            .into_iter()
            .filter(PeerStatus::is_connected)
            .map(|peer| (peer.id.clone(), peer))
            .collect();

        let changed = !self.peers.keys().eq(next.keys());
        self.peers = next;
        changed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerStatus> {
        self.peers.get(id)
    }

    /// Sorted ids of the online peers
    pub fn ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget everything (socket lost)
    ///
    /// Returns true when the registry was not already empty.
    pub fn clear(&mut self) -> bool {
        let changed = !self.peers.is_empty();
        self.peers.clear();
        changed
    }
}
