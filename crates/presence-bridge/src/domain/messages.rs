//! JSON message types for the dashboard WebSocket protocol.
//!
//! The dashboard (a browser app) speaks JSON over WebSocket. Every message
//! is an object with a `"type"` discriminant and a `"data"` payload:
//!
//! ```json
//! {"type":"tcpStatus","data":{"connected":true}}
//! {"type":"sendStats","data":{"total":12,"success":11,"failed":1}}
//! ```
//!
//! Outbound events and inbound commands are separate enums, so sending a
//! command in the event direction is a compile-time error, not a runtime
//! surprise.

use serde::{Deserialize, Serialize};

use presence_core::domain::cursor::Cursor;
use presence_core::domain::zone::{ZoneId, ZoneState};

use crate::domain::config::{BridgeConfig, ZonesFile};

/// One entry in the bounded error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Epoch milliseconds when the error was recorded.
    pub time: u64,
    pub message: String,
}

/// One frame in the bounded send history.
///
/// A record is created *before* the transport is handed the frame (with
/// `sent = false`) and updated in place once the asynchronous outcome
/// arrives, so the dashboard sees both the attempt and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    /// Monotonic record id used to match the outcome back to the attempt.
    pub id: u64,
    pub zone_id: ZoneId,
    pub occupied: bool,
    /// The frame as space-separated uppercase hex pairs.
    pub frame: String,
    /// Epoch milliseconds when the frame was encoded.
    pub time: u64,
    /// Transport connectivity at encode time.
    pub tcp_connected: bool,
    /// Whether the transport accepted the frame. Best-effort: accepted for
    /// delivery, not confirmed received.
    pub sent: bool,
    pub bytes_sent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running send counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SendStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

/// The full state snapshot pushed to a dashboard session on connect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSnapshot {
    pub config: BridgeConfig,
    pub zones: ZonesFile,
    pub cursors: Vec<Cursor>,
    pub zone_states: Vec<(ZoneId, ZoneState)>,
    pub tcp_connected: bool,
    pub send_stats: SendStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sent_frame: Option<FrameRecord>,
    /// Most recent frames, oldest first (capped for the init payload).
    pub sent_frames: Vec<FrameRecord>,
    /// Most recent errors, oldest first (capped for the init payload).
    pub errors: Vec<ErrorEntry>,
    pub output_zone_filter: Vec<ZoneId>,
}

/// Everything the bridge pushes to dashboard sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum DashboardEvent {
    Init(InitSnapshot),
    Cursors(Vec<Cursor>),
    ZoneStates(Vec<(ZoneId, ZoneState)>),
    TcpStatus { connected: bool },
    FrameSent(FrameRecord),
    SendStats(SendStats),
    Error(ErrorEntry),
    OutputZoneFilter(Vec<ZoneId>),
    Config(BridgeConfig),
    Zones(ZonesFile),
}

/// Everything a dashboard session can ask the bridge to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DashboardCommand {
    /// Replace the runtime configuration. Missing fields take defaults.
    SetConfig { config: BridgeConfig },
    /// Replace the zone definitions wholesale.
    SetZones { zones: ZonesFile },
    /// Replace the output zone whitelist; an empty list means "all zones".
    SetOutputFilter { zone_ids: Vec<ZoneId> },
    /// Encode and send one frame outside the normal loop.
    TestSend { zone_id: ZoneId, occupied: bool },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
