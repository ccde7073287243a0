//! Dashboard WebSocket server.
//!
//! Every monitoring session gets the same treatment:
//!
//! 1. WebSocket handshake on the dashboard port.
//! 2. A full [`InitSnapshot`] as the first frame.
//! 3. A forwarder task streaming [`DashboardEvent`]s as JSON text frames.
//! 4. A read loop parsing JSON [`DashboardCommand`]s and queuing them for
//!    the command pump.
//!
//! Sessions are independent Tokio tasks; a slow browser lags its broadcast
//! subscription and drops events rather than backpressuring the bridge.
//! One malformed command is logged and skipped — it never closes the
//! session.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::bridge_service::BridgeService;
use crate::domain::messages::{DashboardCommand, DashboardEvent};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Runs the dashboard accept loop until `running` clears.
///
/// # Errors
///
/// Returns an error only when the listener cannot be bound; per-session
/// failures are logged and contained.
pub async fn run_dashboard(
    service: BridgeService,
    commands: mpsc::Sender<DashboardCommand>,
    port: u16,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind dashboard WebSocket listener on port {port}"))?;
    info!("dashboard WebSocket server listening on port {port}");

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping dashboard accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let session_id = Uuid::new_v4();
                info!("dashboard session {session_id} connected from {peer_addr}");
                let service = service.clone();
                let commands = commands.clone();
                tokio::spawn(async move {
                    match run_session(stream, session_id, service, commands).await {
                        Ok(()) => info!("dashboard session {session_id} closed"),
                        Err(e) => warn!("dashboard session {session_id} ended with error: {e:#}"),
                    }
                });
            }
            Ok(Err(e)) => {
                // Transient accept failure; keep serving other sessions.
                error!("dashboard accept error: {e}");
            }
            Err(_) => {} // poll timeout — loop back to the flag check
        }
    }

    Ok(())
}

/// Full lifecycle of one dashboard session.
async fn run_session(
    stream: TcpStream,
    session_id: Uuid,
    service: BridgeService,
    commands: mpsc::Sender<DashboardCommand>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Subscribe before snapshotting so no event in between is lost.
    let mut events = service.subscribe();
    let snapshot = service.snapshot().await;
    let init = serde_json::to_string(&DashboardEvent::Init(snapshot))
        .context("failed to serialize init snapshot")?;
    ws_tx
        .send(WsMessage::Text(init))
        .await
        .context("failed to send init snapshot")?;

    // Forwarder: broadcast events → JSON text frames.
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("session {session_id}: event serialization error: {e}");
                            continue;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                        debug!("session {session_id}: send failed (client gone)");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The init snapshot lets a lagging client resynchronize
                    // on reconnect; dropping is the correct behaviour here.
                    warn!("session {session_id}: lagged, dropped {skipped} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Command intake: JSON text frames → command pump.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<DashboardCommand>(&text) {
                Ok(command) => {
                    debug!("session {session_id}: command {command:?}");
                    if commands.send(command).await.is_err() {
                        break; // bridge shutting down
                    }
                }
                Err(e) => {
                    // One bad message must not kill the session.
                    warn!("session {session_id}: invalid command JSON: {e}");
                }
            },
            Ok(WsMessage::Close(_)) => {
                debug!("session {session_id}: close frame received");
                break;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                // Protocol-level keepalive; tungstenite replies automatically.
            }
            Ok(WsMessage::Binary(_)) => {
                warn!("session {session_id}: unexpected binary frame (ignored)");
            }
            Ok(WsMessage::Frame(_)) => {}
            Err(e) => {
                debug!("session {session_id}: read error: {e}");
                break;
            }
        }
    }

    forwarder.abort();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
