//! Runtime configuration types for the bridge daemon.
//!
//! [`BridgeConfig`] carries the tunable settings (ports, transport mode,
//! cursor timeout, send strategy); [`ZonesFile`] carries the zone
//! definitions. Both persist to TOML via `infrastructure::storage` and
//! travel to the dashboard as JSON, so every field has a serde default —
//! a missing or partial file always yields a working configuration.

use serde::{Deserialize, Serialize};

use presence_core::domain::zone::{GridConfig, ZoneConfig, ZoneMode, ZoneRect};

/// How frames reach the downstream device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    /// Actively connect out to `tcp_host:tcp_port` and reconnect on loss.
    Client,
    /// Listen on `tcp_port` and fan frames out to every connected peer.
    Server,
}

/// When frames are dispatched by the bridge loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendStrategy {
    /// Send only the zones whose occupancy flipped this tick.
    OnChange,
    /// Send every zone each time the heartbeat interval elapses.
    Heartbeat,
}

/// All runtime settings for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// UDP port the TUIO tracker sends to.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Transport mode for frame delivery.
    #[serde(default = "default_tcp_mode")]
    pub tcp_mode: TcpMode,
    /// Device address in client mode.
    #[serde(default = "default_tcp_host")]
    pub tcp_host: String,
    /// Device port (client mode) or listen port (server mode).
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Cursors unrefreshed for longer than this are expired.
    #[serde(default = "default_cursor_timeout")]
    pub cursor_timeout_ms: u64,
    /// Frame dispatch strategy.
    #[serde(default = "default_send_strategy")]
    pub send_strategy: SendStrategy,
    /// Heartbeat period when `send_strategy` is [`SendStrategy::Heartbeat`].
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Whether zones come from the grid or the custom rectangle list.
    #[serde(default = "default_zone_mode")]
    pub zone_mode: ZoneMode,
    /// Grid columns (kept in sync with the zones file, see `zone_config`).
    #[serde(default = "default_grid_cols")]
    pub grid_cols: u16,
    /// Grid rows.
    #[serde(default = "default_grid_rows")]
    pub grid_rows: u16,
    /// Port of the dashboard WebSocket server.
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,
}

/// Persisted zone definitions: the grid dimensions plus the ordered custom
/// rectangle list. Which of the two is active is decided by
/// [`BridgeConfig::zone_mode`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ZonesFile {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub custom: Vec<ZoneRect>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_udp_port() -> u16 {
    3333
}
fn default_tcp_mode() -> TcpMode {
    TcpMode::Client
}
fn default_tcp_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    8080
}
fn default_cursor_timeout() -> u64 {
    300
}
fn default_send_strategy() -> SendStrategy {
    SendStrategy::OnChange
}
fn default_heartbeat_interval() -> u64 {
    1000
}
fn default_zone_mode() -> ZoneMode {
    ZoneMode::Grid
}
fn default_grid_cols() -> u16 {
    1
}
fn default_grid_rows() -> u16 {
    4
}
fn default_dashboard_port() -> u16 {
    3001
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            tcp_mode: default_tcp_mode(),
            tcp_host: default_tcp_host(),
            tcp_port: default_tcp_port(),
            cursor_timeout_ms: default_cursor_timeout(),
            send_strategy: default_send_strategy(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            zone_mode: default_zone_mode(),
            grid_cols: default_grid_cols(),
            grid_rows: default_grid_rows(),
            dashboard_port: default_dashboard_port(),
        }
    }
}

impl BridgeConfig {
    /// Assembles the engine-facing [`ZoneConfig`] from the active mode and
    /// the zone definitions.
    pub fn zone_config(&self, zones: &ZonesFile) -> ZoneConfig {
        ZoneConfig {
            mode: self.zone_mode,
            grid: zones.grid,
            custom: zones.custom.clone(),
        }
    }

    /// True when `other` differs in any transport-facing field.
    pub fn transport_changed(&self, other: &BridgeConfig) -> bool {
        self.tcp_mode != other.tcp_mode
            || self.tcp_host != other.tcp_host
            || self.tcp_port != other.tcp_port
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_deployed_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.udp_port, 3333);
        assert_eq!(cfg.tcp_mode, TcpMode::Client);
        assert_eq!(cfg.tcp_host, "127.0.0.1");
        assert_eq!(cfg.tcp_port, 8080);
        assert_eq!(cfg.cursor_timeout_ms, 300);
        assert_eq!(cfg.send_strategy, SendStrategy::OnChange);
        assert_eq!(cfg.heartbeat_interval_ms, 1000);
        assert_eq!(cfg.zone_mode, ZoneMode::Grid);
        assert_eq!(cfg.grid_cols, 1);
        assert_eq!(cfg.grid_rows, 4);
        assert_eq!(cfg.dashboard_port, 3001);
    }

    #[test]
    fn test_default_zones_file_is_1x4_grid_with_no_custom_zones() {
        let zones = ZonesFile::default();
        assert_eq!(zones.grid.cols, 1);
        assert_eq!(zones.grid.rows, 4);
        assert!(zones.custom.is_empty());
    }

    #[test]
    fn test_zone_config_takes_mode_from_config_and_shape_from_zones() {
        let mut cfg = BridgeConfig::default();
        cfg.zone_mode = ZoneMode::Custom;
        let zones = ZonesFile {
            grid: GridConfig { cols: 3, rows: 2 },
            custom: vec![ZoneRect { id: 9, x: 0.0, y: 0.0, width: 0.5, height: 0.5 }],
        };

        let zc = cfg.zone_config(&zones);
        assert_eq!(zc.mode, ZoneMode::Custom);
        assert_eq!(zc.grid.cols, 3);
        assert_eq!(zc.custom.len(), 1);
    }

    #[test]
    fn test_transport_changed_detects_each_field() {
        let base = BridgeConfig::default();

        let mut mode = base.clone();
        mode.tcp_mode = TcpMode::Server;
        assert!(base.transport_changed(&mode));

        let mut host = base.clone();
        host.tcp_host = "10.0.0.9".to_string();
        assert!(base.transport_changed(&host));

        let mut port = base.clone();
        port.tcp_port = 9999;
        assert!(base.transport_changed(&port));

        assert!(!base.transport_changed(&base.clone()));
    }

    #[test]
    fn test_config_json_uses_camel_case_field_names() {
        let json = serde_json::to_value(BridgeConfig::default()).unwrap();
        assert!(json.get("udpPort").is_some());
        assert!(json.get("tcpMode").is_some());
        assert!(json.get("cursorTimeoutMs").is_some());
        assert!(json.get("sendStrategy").is_some());
        assert_eq!(json["sendStrategy"], "onChange");
        assert_eq!(json["tcpMode"], "client");
    }

    #[test]
    fn test_partial_json_config_fills_defaults() {
        let cfg: BridgeConfig = serde_json::from_str(r#"{"udpPort": 4444}"#).unwrap();
        assert_eq!(cfg.udp_port, 4444);
        assert_eq!(cfg.tcp_port, 8080);
        assert_eq!(cfg.send_strategy, SendStrategy::OnChange);
    }

    #[test]
    fn test_send_strategy_round_trips_through_json() {
        for strategy in [SendStrategy::OnChange, SendStrategy::Heartbeat] {
            let json = serde_json::to_string(&strategy).unwrap();
            let back: SendStrategy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, strategy);
        }
        assert_eq!(serde_json::to_string(&SendStrategy::Heartbeat).unwrap(), "\"heartbeat\"");
    }
}
