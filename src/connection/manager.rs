//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::StartupError;
use crate::relay::frame::{CONNECTED, DISCONNECTED};
use crate::relay::BroadcastEngine;
use crate::Result;

use super::registry::{ConnectionRegistry, Peer};

/// Pending-connection queue passed to listen(); the prevailing SOMAXCONN
pub const LISTEN_BACKLOG: u32 = 1024;

/// Accepts peers and drives their lifecycle.
///
/// One reader task and one writer task per peer; the accept loop and all
/// reader tasks coordinate through the shared [`ConnectionRegistry`], so
/// registry access is the only cross-task boundary.
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<BroadcastEngine>,
    active_connections: Arc<AtomicUsize>,
    next_peer_id: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&registry),
            config.server.max_payload_size,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            registry,
            engine,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_peer_id: Arc::new(AtomicU64::new(1)),
            shutdown_tx,
        }
    }

    /// Bring the listening socket up.
    ///
    /// The three setup stages are performed separately so each maps onto
    /// its own [`StartupError`] variant and exit code. A socket created by
    /// an earlier stage is released by drop when a later stage fails.
    pub fn prepare(&mut self) -> std::result::Result<(), StartupError> {
        let addr = self.config.server.bind_addr;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(StartupError::SocketCreateFailed)?;

        socket
            .set_reuseaddr(true)
            .map_err(StartupError::SocketCreateFailed)?;

        socket
            .bind(addr)
            .map_err(|source| StartupError::BindFailed { addr, source })?;

        let listener = socket
            .listen(LISTEN_BACKLOG)
            .map_err(|source| StartupError::ListenFailed { addr, source })?;

        if let Ok(local) = listener.local_addr() {
            info!("Listening on {} (backlog {})", local, LISTEN_BACKLOG);
        }
        self.listener = Some(listener);

        Ok(())
    }

    /// Address the listener actually bound to
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Number of peer sessions currently running
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Ask the accept loop and all peer sessions to stop
    pub fn initiate_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Main connection acceptance loop.
    ///
    /// Runs until a shutdown signal arrives; there is no other termination
    /// condition. Transient accept errors (a peer resetting before the
    /// accept completed, descriptor pressure) are logged and the loop
    /// keeps serving.
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("Listener not initialized; call prepare() first"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.accept_peer(stream, addr).await,
                        Err(e) => {
                            warn!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Accept-time lifecycle: register the peer, announce it to everyone
    /// already present, and spawn its session tasks.
    ///
    /// Runs on the accept loop itself, so acceptance is atomic with
    /// registration: peers join the registry in accept order.
    async fn accept_peer(&self, stream: TcpStream, addr: SocketAddr) {
        if self.get_active_connections() >= self.config.server.max_connections {
            // Rejecting means dropping the stream, which closes the
            // accepted handle.
            warn!("Connection limit reached, rejecting connection from {}", addr);
            drop(stream);
            return;
        }

        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) =
            mpsc::channel(self.config.server.outbound_queue_depth);
        let peer = Peer::new(id, addr, outbound_tx);
        debug!("Accepted connection {} from {}", id, addr);

        // Counted before the session task runs, so the limit check above
        // never races a still-starting session.
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        // Register before announcing: the join event excludes the joining
        // peer, and a broadcast racing with this accept cannot miss it.
        self.registry.add(peer.clone()).await;
        info!("{} -> {}", peer.ip, CONNECTED);
        self.engine.broadcast_event(&peer, CONNECTED).await;

        let registry = Arc::clone(&self.registry);
        let engine = Arc::clone(&self.engine);
        let active_connections = Arc::clone(&self.active_connections);
        let max_payload = self.config.server.max_payload_size;
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            run_session(
                stream,
                peer,
                outbound_rx,
                registry,
                engine,
                max_payload,
                shutdown_rx,
            )
            .await;
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Wait for running peer sessions to wind down after a shutdown
    /// request, bounded by the configured shutdown timeout
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let timeout = self.config.server.shutdown_timeout;
        let start = Instant::now();

        let mut last_count = self.get_active_connections();
        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            last_count, timeout
        );

        while last_count > 0 && start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;

            let current = self.get_active_connections();
            if current != last_count {
                debug!("Active connections: {} -> {}", last_count, current);
                last_count = current;
            }
        }

        if last_count > 0 {
            warn!(
                "{} connections still active after {:?}, exiting anyway",
                last_count, timeout
            );
        }

        Ok(())
    }
}

/// Outcome of one peer's read loop
enum SessionEnd {
    /// Orderly close: zero-byte read
    Disconnected,
    /// Genuine I/O error; never conflated with "no data yet", which does
    /// not surface here at all (the task is parked until readable)
    ReadFailed(std::io::Error),
    /// Process-level shutdown interrupted the session
    ShuttingDown,
}

/// One peer's session: relay inbound payloads until the connection ends,
/// then run the teardown sequence exactly once
async fn run_session(
    stream: TcpStream,
    peer: Peer,
    outbound_rx: mpsc::Receiver<Bytes>,
    registry: Arc<ConnectionRegistry>,
    engine: Arc<BroadcastEngine>,
    max_payload: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(drain_outbound(writer, outbound_rx));

    let end = tokio::select! {
        end = read_loop(reader, &peer, &engine, max_payload) => end,
        _ = shutdown_rx.recv() => SessionEnd::ShuttingDown,
    };

    // Teardown happens exactly once, in this order: announce the departure
    // (the address text was captured at accept time and is still valid),
    // then release the transport, then deregister.
    engine.broadcast_event(&peer, DISCONNECTED).await;
    match end {
        SessionEnd::Disconnected => info!("{} -> {}", peer.ip, DISCONNECTED),
        SessionEnd::ReadFailed(e) => {
            warn!("Read error on {}: {}; closing connection", peer.ip, e)
        }
        SessionEnd::ShuttingDown => debug!("Closing {} for shutdown", peer.ip),
    }

    // The read half was dropped when the read loop ended; stopping the
    // writer drops the other half, closing the socket in both directions.
    writer_task.abort();
    let _ = writer_task.await;

    registry.remove(peer.id).await;
}

/// Read newline-delimited payloads and broadcast them
async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: &Peer,
    engine: &BroadcastEngine,
    max_payload: usize,
) -> SessionEnd {
    let mut buf = vec![0u8; max_payload];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return SessionEnd::Disconnected,
            Ok(n) => {
                let payload = &buf[..n];
                trace!("{} - {}", peer.ip, String::from_utf8_lossy(payload).trim_end());
                engine.broadcast_message(peer, payload).await;
            }
            Err(e) => return SessionEnd::ReadFailed(e),
        }
    }
}

/// Drain a peer's outbound queue into its write half.
///
/// A failed write ends the drain; the peer's read loop observes the dead
/// socket and runs the one teardown path.
async fn drain_outbound(mut writer: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Outbound write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
