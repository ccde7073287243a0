//! UDP listener for inbound TUIO traffic.
//!
//! Binds the configured port, hands every datagram to the bridge service's
//! ingest path, and can be re-pointed to a new port at runtime (the old
//! socket task is aborted and a fresh one bound). Socket errors are
//! reported through the service's error log; nothing here is fatal.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::bridge_service::BridgeService;

/// Largest datagram the listener accepts. TUIO bundles from real trackers
/// are a few hundred bytes; 4 KiB leaves generous headroom.
const MAX_DATAGRAM: usize = 4096;

/// The restartable UDP ingest task.
pub struct TuioListener {
    service: BridgeService,
    task: Mutex<Option<JoinHandle<()>>>,
    port: Mutex<u16>,
}

impl TuioListener {
    pub fn new(service: BridgeService) -> Arc<Self> {
        Arc::new(Self {
            service,
            task: Mutex::new(None),
            port: Mutex::new(0),
        })
    }

    /// Binds `port` and starts the receive loop, replacing any previous one.
    pub async fn start(&self, port: u16) {
        self.stop().await;
        *self.port.lock().await = port;

        let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => {
                info!("TUIO/UDP listener started on port {port}");
                socket
            }
            Err(e) => {
                self.service
                    .report_error(format!("UDP bind on port {port} failed: {e}"))
                    .await;
                return;
            }
        };

        let service = self.service.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        debug!("datagram of {len} bytes from {from}");
                        service.ingest_datagram(&buf[..len]).await;
                    }
                    Err(e) => {
                        service
                            .report_error(format!("UDP receive error: {e}"))
                            .await;
                    }
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// Rebinds to a new port. A no-op when the port is unchanged.
    pub async fn update_port(&self, port: u16) {
        if *self.port.lock().await == port {
            return;
        }
        info!("re-pointing TUIO listener to port {port}");
        self.start(port).await;
    }

    /// Aborts the receive loop and releases the socket.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
