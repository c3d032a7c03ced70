//! Control server - port scanning, the accept loop, and per-connection I/O

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::handler::RequestHandler;
use super::protocol::{self, ErrorFrame, ResultFrame, UpdateFrame};
use crate::error::{GuardianError, Result};

/// Scan `[start, end]` and return the first port that accepts a bind,
/// or -1 when the whole range is taken. When `end < start` the range
/// collapses to `start` alone. Each probe socket is closed immediately.
pub fn find_first_port(start: u16, end: u16) -> i32 {
    let end = end.max(start);
    for port in start..=end {
        if std::net::TcpListener::bind(("0.0.0.0", port)).is_ok() {
            return i32::from(port);
        }
    }
    -1
}

/// Connection bookkeeping shared between the accept loop and handlers
pub struct ServerState {
    address: String,
    active: AtomicBool,
    connections: Mutex<HashSet<String>>,
    subscribers: Mutex<HashSet<String>>,
    shutdown: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(address: String, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            address,
            active: AtomicBool::new(true),
            connections: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// The listener's bound address, host:port
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the accept loop; open connections drain naturally
    pub fn shutdown(&self) -> bool {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.send(()).is_ok()
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub async fn add_connection(&self, peer: &str) {
        let mut connections = self.connections.lock().await;
        connections.insert(peer.to_string());
        info!("Client connected: {} ({} active)", peer, connections.len());
    }

    pub async fn remove_connection(&self, peer: &str) {
        let mut connections = self.connections.lock().await;
        connections.remove(peer);
        self.subscribers.lock().await.remove(peer);
        info!("Client disconnected: {} ({} active)", peer, connections.len());
    }

    pub async fn subscribe(&self, peer: &str) {
        self.subscribers.lock().await.insert(peer.to_string());
        info!("{} subscribed to updates", peer);
    }

    pub async fn is_subscribed(&self, peer: &str) -> bool {
        self.subscribers.lock().await.contains(peer)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

/// The bound TCP control server
pub struct ControlServer {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl ControlServer {
    /// Probe the configured range and bind the listener.
    ///
    /// If a probed port gets taken before the real bind lands, the scan
    /// restarts past the contested port. Attempts are bounded by the
    /// range width, then startup fails.
    pub async fn bind(
        start_port: u16,
        end_port: u16,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let end_port = end_port.max(start_port);
        let mut attempts = usize::from(end_port - start_port) + 1;
        let mut scan_from = start_port;

        loop {
            let port = find_first_port(scan_from, end_port);
            if port < 0 {
                return Err(GuardianError::network(format!(
                    "No free port in {}-{}",
                    start_port, end_port
                )));
            }
            let port = port as u16;

            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    let address = format!("0.0.0.0:{}", port);
                    info!("Control server listening on {}", address);
                    return Ok(Self {
                        state: Arc::new(ServerState::new(address, shutdown)),
                        listener,
                    });
                }
                Err(e) => {
                    attempts -= 1;
                    if attempts == 0 || port >= end_port {
                        return Err(GuardianError::network(format!(
                            "No free port in {}-{}: {}",
                            start_port, end_port, e
                        )));
                    }
                    warn!("Port {} was taken between probe and listen: {}", port, e);
                    scan_from = port + 1;
                }
            }
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections until shutdown fires; each connection gets its
    /// own task and its own subscription to the update channel.
    pub async fn run(
        self,
        handler: Arc<dyn RequestHandler>,
        updates: broadcast::Sender<Value>,
    ) {
        let mut shutdown = self.state.shutdown_receiver();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let peer = addr.to_string();
                            let server = Arc::clone(&self.state);
                            let handler = Arc::clone(&handler);
                            let updates = updates.subscribe();
                            tokio::spawn(async move {
                                server.add_connection(&peer).await;
                                if let Err(e) =
                                    handle_client(stream, &peer, &server, handler, updates).await
                                {
                                    debug!("Connection {} ended: {}", peer, e);
                                }
                                server.remove_connection(&peer).await;
                            });
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Control server stopping");
                    break;
                }
            }
        }
    }
}

/// Serve one connection: answer request lines in order, and forward push
/// updates once the peer has subscribed.
async fn handle_client(
    stream: TcpStream,
    peer: &str,
    server: &Arc<ServerState>,
    handler: Arc<dyn RequestHandler>,
    mut updates: broadcast::Receiver<Value>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        tokio::select! {
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    break;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let reply = match protocol::parse_line(trimmed) {
                        Ok(request) => {
                            let id = request.id;
                            match handler.handle(request, peer).await {
                                Ok(result) => encode_frame(&ResultFrame::new(id, result)),
                                Err(rpc_error) => encode_frame(&ErrorFrame::new(&rpc_error)),
                            }
                        }
                        Err(rpc_error) => encode_frame(&ErrorFrame::new(&rpc_error)),
                    };
                    if let Some(reply) = reply {
                        writer.write_all(reply.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                }
                line.clear();
            }
            update = updates.recv() => {
                match update {
                    Ok(value) => {
                        if server.is_subscribed(peer).await {
                            if let Some(frame) = encode_frame(&UpdateFrame::new(value)) {
                                writer.write_all(frame.as_bytes()).await?;
                                writer.write_all(b"\n").await?;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Connection {} lagged, {} updates dropped", peer, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

fn encode_frame<T: Serialize>(frame: &T) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode frame: {}", e);
            None
        }
    }
}
