//! TCP transport for presence frames.
//!
//! Two mutually exclusive modes, switchable at runtime:
//!
//! - **client** — actively connects to the configured device address and
//!   reconnects on loss with exponential backoff (1 s · 2^attempt, capped
//!   at 30 s). After [`MAX_RECONNECT_ATTEMPTS`] consecutive failures the
//!   transport stays disconnected until it is reconfigured.
//! - **server** — listens on the configured port and fans every frame out
//!   to all connected peers; connectivity means "at least one peer".
//!
//! Delivery is fire-and-forget: an accepted write resolves to a success
//! outcome after a short fixed delay, which means "accepted for delivery"
//! and nothing stronger — the device protocol has no acknowledgment.
//! Connectivity changes and transport errors flow outward on an event
//! channel; nothing in here can crash the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use presence_core::protocol::Frame;

use crate::application::bridge_service::{FrameTransport, SendOutcome};
use crate::domain::config::{BridgeConfig, TcpMode};

/// Reconnection stops permanently after this many consecutive failures.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// First reconnect delay; doubles per attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Ceiling for the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// The fixed "accepted for delivery" settle delay after a write.
const SEND_ACK_DELAY: Duration = Duration::from_millis(10);

/// How often the server accept loop re-checks for teardown.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Backoff delay before reconnect attempt number `attempt` (counted from 0):
/// `min(1000 ms · 2^attempt, 30 s)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let base = RECONNECT_BASE_DELAY.as_millis() as u64;
    let delay = base
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RECONNECT_MAX_DELAY.as_millis() as u64);
    Duration::from_millis(delay)
}

/// Transport-facing slice of the bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub mode: TcpMode,
    pub host: String,
    pub port: u16,
}

impl TransportConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            mode: config.tcp_mode,
            host: config.tcp_host.clone(),
            port: config.tcp_port,
        }
    }
}

/// Events emitted by the transport to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connectivity changed: connected (client) / at least one peer (server).
    Status { connected: bool },
    /// A connect, accept, or listen failure worth surfacing.
    Error { message: String },
}

type SharedWrite = Arc<Mutex<OwnedWriteHalf>>;

struct Peer {
    id: u64,
    write: SharedWrite,
}

/// The TCP transport. Cheap to clone; all clones drive the same sockets.
#[derive(Clone)]
pub struct TransportManager {
    config: Arc<Mutex<TransportConfig>>,
    client_write: Arc<Mutex<Option<SharedWrite>>>,
    peers: Arc<Mutex<Vec<Peer>>>,
    connected: Arc<AtomicBool>,
    /// Bumped on every stop; tasks from older generations must not touch
    /// shared state after a teardown/restart.
    generation: Arc<AtomicU64>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    peer_ids: Arc<AtomicU64>,
    events: mpsc::Sender<TransportEvent>,
}

impl TransportManager {
    /// Creates a transport (not yet started) and the event receiver.
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let mgr = Self {
            config: Arc::new(Mutex::new(config)),
            client_write: Arc::new(Mutex::new(None)),
            peers: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            peer_ids: Arc::new(AtomicU64::new(1)),
            events: tx,
        };
        (mgr, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Number of connected peers (server mode; always 0 or 1 for client).
    pub async fn peer_count(&self) -> usize {
        match self.config.lock().await.mode {
            TcpMode::Server => self.peers.lock().await.len(),
            TcpMode::Client => usize::from(self.client_write.lock().await.is_some()),
        }
    }

    /// Starts the mode-appropriate background task.
    pub async fn start(&self) {
        let gen = self.generation.load(Ordering::Relaxed);
        let mode = self.config.lock().await.mode;
        let this = self.clone();
        let handle = match mode {
            TcpMode::Client => tokio::spawn(async move { this.run_client(gen).await }),
            TcpMode::Server => tokio::spawn(async move { this.run_server(gen).await }),
        };
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Tears everything down: aborts tasks, drops sockets, cancels any
    /// pending reconnection, reports disconnected.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        *self.client_write.lock().await = None;
        self.peers.lock().await.clear();
        self.set_connected(false).await;
    }

    /// Applies a new mode/host/port. A no-op when nothing changed;
    /// otherwise the transport restarts cleanly with a fresh reconnect
    /// attempt counter.
    pub async fn update_config(&self, new: TransportConfig) {
        {
            let current = self.config.lock().await;
            if *current == new {
                return;
            }
        }
        info!(
            "transport reconfigured: {:?} {}:{}",
            new.mode, new.host, new.port
        );
        self.stop().await;
        *self.config.lock().await = new;
        self.start().await;
    }

    /// Delivers one frame per the active mode. See the module docs for the
    /// best-effort semantics.
    pub async fn send_frame(&self, frame: Frame) -> SendOutcome {
        let mode = self.config.lock().await.mode;
        match mode {
            TcpMode::Client => self.send_client(frame).await,
            TcpMode::Server => self.send_server(frame).await,
        }
    }

    async fn send_client(&self, frame: Frame) -> SendOutcome {
        let write = self.client_write.lock().await.clone();
        let Some(write) = write else {
            return SendOutcome::not_connected();
        };
        let result = {
            let mut w = write.lock().await;
            w.write_all(&frame).await
        };
        match result {
            Ok(()) => {
                sleep(SEND_ACK_DELAY).await;
                SendOutcome::accepted(frame.len())
            }
            Err(e) => SendOutcome::failure(format!("TCP write failed: {e}")),
        }
    }

    async fn send_server(&self, frame: Frame) -> SendOutcome {
        // Snapshot the peer set at send time: peers added or removed while
        // the fan-out is in flight do not affect this frame's outcome.
        let snapshot: Vec<SharedWrite> = self
            .peers
            .lock()
            .await
            .iter()
            .map(|p| p.write.clone())
            .collect();
        if snapshot.is_empty() {
            return SendOutcome::not_connected();
        }

        let mut delivered = 0usize;
        let mut errors: Vec<String> = Vec::new();
        for write in snapshot {
            let result = {
                let mut w = write.lock().await;
                w.write_all(&frame).await
            };
            match result {
                Ok(()) => delivered += 1,
                Err(e) => errors.push(e.to_string()),
            }
        }

        if delivered > 0 {
            sleep(SEND_ACK_DELAY).await;
            SendOutcome::accepted(frame.len() * delivered)
        } else {
            SendOutcome::failure(errors.join("; "))
        }
    }

    // ── Client mode ───────────────────────────────────────────────────────────

    async fn run_client(self, gen: u64) {
        let (host, port) = {
            let c = self.config.lock().await;
            (c.host.clone(), c.port)
        };
        let mut attempts: u32 = 0;

        loop {
            if self.stale(gen) {
                return;
            }
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => {
                    info!("connected to device at {host}:{port}");
                    attempts = 0;
                    let (read_half, write_half) = stream.into_split();
                    *self.client_write.lock().await = Some(Arc::new(Mutex::new(write_half)));
                    self.set_connected(true).await;

                    drain_until_closed(read_half).await;

                    if self.stale(gen) {
                        return;
                    }
                    *self.client_write.lock().await = None;
                    self.set_connected(false).await;
                    info!("device connection closed");
                }
                Err(e) => {
                    if attempts == 0 {
                        self.emit_error(format!("TCP connect to {host}:{port} failed: {e}"))
                            .await;
                    } else {
                        debug!("reconnect attempt {attempts} failed: {e}");
                    }
                    self.set_connected(false).await;
                }
            }

            if attempts >= MAX_RECONNECT_ATTEMPTS {
                self.emit_error(
                    "max reconnect attempts reached; staying disconnected until reconfigured"
                        .to_string(),
                )
                .await;
                return;
            }
            let delay = reconnect_delay(attempts);
            attempts += 1;
            debug!("reconnecting in {delay:?} (attempt {attempts}/{MAX_RECONNECT_ATTEMPTS})");
            sleep(delay).await;
        }
    }

    // ── Server mode ───────────────────────────────────────────────────────────

    async fn run_server(self, gen: u64) {
        let port = self.config.lock().await.port;
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(l) => {
                info!("TCP server listening on port {port}");
                l
            }
            Err(e) => {
                self.emit_error(format!("TCP listen on port {port} failed: {e}"))
                    .await;
                return;
            }
        };

        loop {
            if self.stale(gen) {
                return;
            }
            // Bounded accept wait so teardown is noticed promptly even when
            // no peer ever connects.
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    if self.stale(gen) {
                        return;
                    }
                    info!("peer connected from {addr}");
                    let (read_half, write_half) = stream.into_split();
                    let peer_id = self.peer_ids.fetch_add(1, Ordering::Relaxed);
                    self.peers.lock().await.push(Peer {
                        id: peer_id,
                        write: Arc::new(Mutex::new(write_half)),
                    });
                    self.set_connected(true).await;

                    let this = self.clone();
                    let watcher = tokio::spawn(async move {
                        drain_until_closed(read_half).await;
                        if this.stale(gen) {
                            return;
                        }
                        let remaining = {
                            let mut peers = this.peers.lock().await;
                            peers.retain(|p| p.id != peer_id);
                            peers.len()
                        };
                        info!("peer {addr} disconnected ({remaining} remaining)");
                        this.set_connected(remaining > 0).await;
                    });
                    let mut tasks = self.tasks.lock().await;
                    tasks.retain(|h| !h.is_finished());
                    tasks.push(watcher);
                }
                Ok(Err(e)) => {
                    // Transient accept failure; keep serving.
                    self.emit_error(format!("TCP accept error: {e}")).await;
                }
                Err(_) => {} // poll timeout — loop back to the staleness check
            }
        }
    }

    // ── Shared helpers ────────────────────────────────────────────────────────

    fn stale(&self, gen: u64) -> bool {
        self.generation.load(Ordering::Relaxed) != gen
    }

    async fn set_connected(&self, connected: bool) {
        let prev = self.connected.swap(connected, Ordering::Relaxed);
        if prev != connected {
            let _ = self.events.send(TransportEvent::Status { connected }).await;
        }
    }

    async fn emit_error(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(TransportEvent::Error { message }).await;
    }
}

#[async_trait]
impl FrameTransport for TransportManager {
    async fn send(&self, frame: Frame) -> SendOutcome {
        self.send_frame(frame).await
    }
}

/// Reads and discards inbound bytes until the peer closes or errors.
/// The device protocol is one-directional, so anything received is noise;
/// the read loop exists to notice the close.
async fn drain_until_closed(mut read_half: OwnedReadHalf) {
    let mut buf = [0u8; 1024];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!("connection read error: {e}");
                return;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
