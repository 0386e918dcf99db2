//! Connection Registry
//!
//! The set of currently connected peers. All mutation happens behind one
//! `RwLock`, which is the explicit boundary required by the
//! task-per-connection design: reader tasks and the accept loop never
//! touch the map without it.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

/// Identity of a connected peer; unique for the lifetime of the process
pub type PeerId = u64;

/// A live peer connection as the rest of the hub sees it.
///
/// The registry holds no transport handle; the reader and writer halves
/// are owned by the peer's session tasks, and `outbound` is the only way
/// to push bytes toward the peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Peer address rendered as dotted-decimal text, captured at accept
    /// time so announcements stay valid through teardown
    pub ip: String,
    /// Bounded outbound frame queue; fan-out never blocks on it
    pub outbound: mpsc::Sender<Bytes>,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            addr,
            ip: addr.ip().to_string(),
            outbound,
        }
    }
}

/// Registry of live peers, keyed by identity
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer; ids are unique by construction, so this never
    /// replaces an existing entry in practice
    pub async fn add(&self, peer: Peer) {
        self.peers.write().await.insert(peer.id, peer);
    }

    /// Remove a peer by identity
    pub async fn remove(&self, id: PeerId) -> Option<Peer> {
        self.peers.write().await.remove(&id)
    }

    /// Clone out the current membership.
    ///
    /// The returned snapshot is what fan-out iterates over: a removal that
    /// races with an in-progress broadcast can neither skip nor
    /// double-visit any other entry of that broadcast.
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
