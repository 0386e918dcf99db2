//! Broadcast Engine

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::connection::{ConnectionRegistry, Peer, PeerId};
use super::frame::format_frame;

/// Fans frames out to every registered peer except the sender.
///
/// Delivery is fire-and-forget: each recipient gets exactly one
/// non-blocking enqueue attempt, and a peer whose outbound queue is full
/// simply misses the frame. Nothing is buffered or retried on its behalf.
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    max_payload: usize,
}

impl BroadcastEngine {
    /// Create a new broadcast engine over a registry
    pub fn new(registry: Arc<ConnectionRegistry>, max_payload: usize) -> Self {
        Self {
            registry,
            max_payload,
        }
    }

    /// Frame a payload from `sender` and deliver it to everyone else
    pub async fn broadcast_message(&self, sender: &Peer, payload: &[u8]) {
        let frame = format_frame(&sender.ip, payload, self.max_payload);
        self.fan_out(frame, sender.id).await;
    }

    /// Broadcast a synthetic lifecycle event attributed to `sender`
    pub async fn broadcast_event(&self, sender: &Peer, event: &str) {
        self.broadcast_message(sender, event.as_bytes()).await;
    }

    async fn fan_out(&self, frame: Bytes, excluding: PeerId) {
        for peer in self.registry.snapshot().await {
            if peer.id == excluding {
                continue;
            }
            match peer.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow consumer: drop the frame for this peer rather
                    // than block or queue further.
                    debug!("Outbound queue full for {}, dropping frame", peer.ip);
                }
                Err(TrySendError::Closed(_)) => {
                    // Peer is mid-teardown; its registry entry goes away
                    // momentarily.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    use crate::relay::frame::{DEFAULT_MAX_PAYLOAD, CONNECTED};

    async fn add_peer(
        registry: &ConnectionRegistry,
        id: PeerId,
        depth: usize,
    ) -> (Peer, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth);
        let addr: SocketAddr = format!("10.0.0.{}:4000", id).parse().unwrap();
        let peer = Peer::new(id, addr, tx);
        registry.add(peer.clone()).await;
        (peer, rx)
    }

    #[tokio::test]
    async fn sender_is_excluded_from_its_own_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = BroadcastEngine::new(Arc::clone(&registry), DEFAULT_MAX_PAYLOAD);

        let (sender, mut sender_rx) = add_peer(&registry, 1, 4).await;
        let (_other, mut other_rx) = add_peer(&registry, 2, 4).await;

        engine.broadcast_message(&sender, b"hello").await;

        let frame = other_rx.recv().await.expect("other peer receives the frame");
        assert_eq!(&frame[..], b"[10.0.0.1]        hello\n");
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_non_sender_receives_exactly_one_frame() {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = BroadcastEngine::new(Arc::clone(&registry), DEFAULT_MAX_PAYLOAD);

        let (sender, _sender_rx) = add_peer(&registry, 1, 4).await;
        let mut receivers = Vec::new();
        for id in 2..=4 {
            let (_, rx) = add_peer(&registry, id, 4).await;
            receivers.push(rx);
        }

        engine.broadcast_event(&sender, CONNECTED).await;

        for rx in &mut receivers {
            let frame = rx.recv().await.expect("peer receives the event");
            assert_eq!(&frame[..], b"[10.0.0.1]        connected\n");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn full_queue_drops_the_frame_without_blocking() {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = BroadcastEngine::new(Arc::clone(&registry), DEFAULT_MAX_PAYLOAD);

        let (sender, _sender_rx) = add_peer(&registry, 1, 4).await;
        // Queue depth of one: the second frame has nowhere to go.
        let (_slow, mut slow_rx) = add_peer(&registry, 2, 1).await;

        engine.broadcast_message(&sender, b"first").await;
        engine.broadcast_message(&sender, b"second").await;

        let frame = slow_rx.recv().await.expect("first frame was queued");
        assert_eq!(&frame[..], b"[10.0.0.1]        first\n");
        assert!(slow_rx.try_recv().is_err(), "second frame was dropped");
    }

    #[tokio::test]
    async fn closed_receiver_does_not_disturb_the_fan_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = BroadcastEngine::new(Arc::clone(&registry), DEFAULT_MAX_PAYLOAD);

        let (sender, _sender_rx) = add_peer(&registry, 1, 4).await;
        let (_gone, gone_rx) = add_peer(&registry, 2, 4).await;
        let (_live, mut live_rx) = add_peer(&registry, 3, 4).await;
        drop(gone_rx);

        engine.broadcast_message(&sender, b"hello").await;

        let frame = live_rx.recv().await.expect("live peer still receives");
        assert_eq!(&frame[..], b"[10.0.0.1]        hello\n");
    }
}
