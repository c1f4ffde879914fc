//! Connection registry: peer ids mapped to their TCP write halves.
//!
//! Shared between the accept/dial paths (which register new peers) and
//! the gossip drain (which writes framed messages out).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Registry of active peer write halves.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<Mutex<OwnedWriteHalf>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer's write half. A previous connection for the same
    /// peer is replaced; dropping the old writer closes its half.
    pub fn insert(&mut self, peer_id: String, writer: OwnedWriteHalf) {
        self.connections
            .insert(peer_id, Arc::new(Mutex::new(writer)));
    }

    /// Remove a peer, returning its write half if present.
    pub fn remove(&mut self, peer_id: &str) -> Option<Arc<Mutex<OwnedWriteHalf>>> {
        self.connections.remove(peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<Mutex<OwnedWriteHalf>>> {
        self.connections.get(peer_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Snapshot of all write halves, for fan-out.
    pub fn writers(&self) -> Vec<(String, Arc<Mutex<OwnedWriteHalf>>)> {
        self.connections
            .iter()
            .map(|(id, w)| (id.clone(), Arc::clone(w)))
            .collect()
    }
}
