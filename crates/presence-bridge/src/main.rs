//! Presence bridge daemon — entry point.
//!
//! Receives TUIO cursor traffic over UDP, tracks per-zone occupancy, and
//! delivers 8-byte presence frames to a downstream device over TCP. A
//! WebSocket dashboard channel exposes live state and accepts
//! configuration commands.
//!
//! # Usage
//!
//! ```text
//! presence-bridge [OPTIONS]
//!
//! Options:
//!   --udp-port       <PORT>  TUIO/UDP listen port override
//!   --dashboard-port <PORT>  Dashboard WebSocket port override
//!   --tcp-mode       <MODE>  Transport mode override: client | server
//!   --tcp-host       <HOST>  Device host override (client mode)
//!   --tcp-port       <PORT>  Device/listen port override
//! ```
//!
//! Settings are loaded from `config.toml`/`zones.toml` in the platform
//! config directory; CLI flags (or their `PRESENCE_*` environment
//! variables) override the loaded values for this run. Log level is
//! controlled by `RUST_LOG`.
//!
//! # Architecture
//!
//! ```text
//! TUIO tracker ──UDP──▶ TuioListener ─▶ BridgeService (50 ms tick)
//!                                           │    │
//!                       TransportManager ◀──┘    └──▶ dashboard WS
//!                        (TCP client/server)          (events + commands)
//!                              │
//!                              ▼
//!                       presence device
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use presence_bridge::application::BridgeService;
use presence_bridge::domain::config::{BridgeConfig, TcpMode, ZonesFile};
use presence_bridge::domain::messages::DashboardCommand;
use presence_bridge::infrastructure::transport::{
    TransportConfig, TransportEvent, TransportManager,
};
use presence_bridge::infrastructure::tuio_listener::TuioListener;
use presence_bridge::infrastructure::{dashboard, storage};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TUIO-to-TCP presence bridge.
#[derive(Debug, Parser)]
#[command(
    name = "presence-bridge",
    about = "Bridges TUIO cursor tracking to a binary TCP presence protocol",
    version
)]
struct Cli {
    /// UDP port the TUIO tracker sends to.
    #[arg(long, env = "PRESENCE_UDP_PORT")]
    udp_port: Option<u16>,

    /// Port of the dashboard WebSocket server.
    #[arg(long, env = "PRESENCE_DASHBOARD_PORT")]
    dashboard_port: Option<u16>,

    /// Transport mode: "client" connects out to the device, "server"
    /// listens for device connections.
    #[arg(long, env = "PRESENCE_TCP_MODE")]
    tcp_mode: Option<String>,

    /// Device hostname or IP (client mode).
    #[arg(long, env = "PRESENCE_TCP_HOST")]
    tcp_host: Option<String>,

    /// Device port (client mode) or listen port (server mode).
    #[arg(long, env = "PRESENCE_TCP_PORT")]
    tcp_port: Option<u16>,
}

impl Cli {
    /// Applies the CLI overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut BridgeConfig) -> anyhow::Result<()> {
        if let Some(port) = self.udp_port {
            config.udp_port = port;
        }
        if let Some(port) = self.dashboard_port {
            config.dashboard_port = port;
        }
        if let Some(host) = &self.tcp_host {
            config.tcp_host = host.clone();
        }
        if let Some(port) = self.tcp_port {
            config.tcp_port = port;
        }
        if let Some(mode) = &self.tcp_mode {
            config.tcp_mode = match mode.as_str() {
                "client" => TcpMode::Client,
                "server" => TcpMode::Server,
                other => anyhow::bail!("invalid --tcp-mode '{other}' (expected client or server)"),
            };
        }
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // A broken config file must not keep the bridge down; fall back to
    // defaults and say so.
    let mut config = match storage::load_config() {
        Ok(config) => config,
        Err(e) => {
            warn!("failed to load configuration: {e}; using defaults");
            BridgeConfig::default()
        }
    };
    let zones = match storage::load_zones() {
        Ok(zones) => zones,
        Err(e) => {
            warn!("failed to load zone definitions: {e}; using defaults");
            ZonesFile::default()
        }
    };
    cli.apply_overrides(&mut config)?;

    info!(
        "presence bridge starting — udp {}, tcp {:?} {}:{}, dashboard {}",
        config.udp_port, config.tcp_mode, config.tcp_host, config.tcp_port, config.dashboard_port
    );

    // ── Wire the pieces together ──────────────────────────────────────────────

    let (transport, mut transport_rx) =
        TransportManager::new(TransportConfig::from_bridge(&config));
    let service = BridgeService::new(config.clone(), zones, Arc::new(transport.clone()));
    transport.start().await;

    let listener = TuioListener::new(service.clone());
    listener.start(config.udp_port).await;

    // Transport event pump: connectivity and errors into the shared state.
    {
        let service = service.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                match event {
                    TransportEvent::Status { connected } => {
                        service.set_tcp_connected(connected).await;
                    }
                    TransportEvent::Error { message } => {
                        service.report_error(message).await;
                    }
                }
            }
        });
    }

    // Command pump: dashboard commands re-point the moving parts.
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<DashboardCommand>(32);
    {
        let service = service.clone();
        let transport = transport.clone();
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                handle_command(command, &service, &transport, &listener).await;
            }
        });
    }

    let running = Arc::new(AtomicBool::new(true));

    // Dashboard WebSocket server.
    {
        let service = service.clone();
        let running = Arc::clone(&running);
        let port = config.dashboard_port;
        tokio::spawn(async move {
            if let Err(e) = dashboard::run_dashboard(service, cmd_tx, port, running).await {
                error!("dashboard server failed: {e:#}");
            }
        });
    }

    // Ctrl-C clears the running flag; every loop checks it.
    {
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    info!("presence bridge ready");
    service.run(Arc::clone(&running)).await;

    listener.stop().await;
    transport.stop().await;
    info!("presence bridge stopped");
    Ok(())
}

/// Applies one dashboard command, persisting and re-pointing as needed.
async fn handle_command(
    command: DashboardCommand,
    service: &BridgeService,
    transport: &TransportManager,
    listener: &TuioListener,
) {
    match command {
        DashboardCommand::SetConfig { config } => {
            let changes = service.apply_config(config).await;
            // Persist the authoritative (clamped) copy, not the raw input.
            let config = service.config().await;
            if let Err(e) = storage::save_config(&config) {
                service
                    .report_error(format!("failed to persist configuration: {e}"))
                    .await;
            }
            if changes.zones_changed {
                let zones = service.zones().await;
                if let Err(e) = storage::save_zones(&zones) {
                    service
                        .report_error(format!("failed to persist zone definitions: {e}"))
                        .await;
                }
            }
            if changes.udp_port_changed {
                listener.update_port(config.udp_port).await;
            }
            if changes.transport_changed {
                transport
                    .update_config(TransportConfig::from_bridge(&config))
                    .await;
            }
        }
        DashboardCommand::SetZones { zones } => {
            service.apply_zones(zones).await;
            let zones = service.zones().await;
            if let Err(e) = storage::save_zones(&zones) {
                service
                    .report_error(format!("failed to persist zone definitions: {e}"))
                    .await;
            }
            // Grid dimensions were written through to the config surface.
            let config = service.config().await;
            if let Err(e) = storage::save_config(&config) {
                service
                    .report_error(format!("failed to persist configuration: {e}"))
                    .await;
            }
        }
        DashboardCommand::SetOutputFilter { zone_ids } => {
            service.set_output_filter(zone_ids).await;
        }
        DashboardCommand::TestSend { zone_id, occupied } => {
            let (record, outcome) = service.test_send(zone_id, occupied).await;
            info!(
                "test frame for zone {zone_id}: {} — {}",
                record.frame,
                if outcome.success { "accepted" } else { "failed" }
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
