//! BridgeService: the periodic driver tying ingest, expiry, occupancy and
//! frame dispatch together.
//!
//! All mutable bridge state lives in one [`BridgeState`] behind a single
//! async mutex owned by the service — the UDP ingest path and the 50 ms
//! tick both mutate cursors and zone states, and funneling them through one
//! lock is the entire concurrency discipline. Sends are asynchronous and
//! never block the tick: dispatch records the attempt, hands the frame to
//! the transport in a spawned task, and the outcome updates counters and
//! history when it arrives.
//!
//! The service depends on the [`FrameTransport`] trait rather than the TCP
//! layer directly, so the dispatch rules are unit-testable with a recording
//! double.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use presence_core::domain::cursor::CursorTracker;
use presence_core::domain::zone::{changed_zones, compute_occupancy, GridConfig, ZoneId, ZoneState};
use presence_core::protocol::{decode_packet, frame, parse_command, Frame};

use crate::domain::config::{BridgeConfig, SendStrategy, ZonesFile};
use crate::domain::messages::{DashboardEvent, ErrorEntry, FrameRecord, InitSnapshot, SendStats};

/// Period of the bridge loop.
pub const TICK_INTERVAL_MS: u64 = 50;

/// Maximum retained frame records (FIFO eviction).
pub const FRAME_HISTORY_CAP: usize = 50;

/// Maximum retained error entries (FIFO eviction).
pub const ERROR_LOG_CAP: usize = 100;

/// How many history entries the init snapshot carries.
const INIT_TAIL: usize = 20;

/// Dashboard event channel capacity; slow sessions lag and drop rather
/// than backpressure the bridge.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Current time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// Result of handing one frame to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub bytes_sent: usize,
    pub error: Option<String>,
    /// True when `success` means "accepted for delivery", not "confirmed
    /// received" — the device protocol carries no acknowledgment, so every
    /// successful send is best-effort.
    pub best_effort: bool,
}

impl SendOutcome {
    /// A write the transport accepted.
    pub fn accepted(bytes_sent: usize) -> Self {
        Self {
            success: true,
            bytes_sent,
            error: None,
            best_effort: true,
        }
    }

    /// A definite failure with the underlying message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            bytes_sent: 0,
            error: Some(message.into()),
            best_effort: false,
        }
    }

    /// The immediate failure returned when no peer is reachable.
    pub fn not_connected() -> Self {
        Self::failure("not connected")
    }
}

/// Trait for delivering encoded frames to the downstream device.
///
/// The TCP layer implements this; tests substitute a recording double.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Delivers one frame, resolving to its (best-effort) outcome.
    async fn send(&self, frame: Frame) -> SendOutcome;
}

// ── Bridge state ──────────────────────────────────────────────────────────────

/// Everything mutable the bridge owns, guarded by one lock.
#[derive(Debug)]
pub struct BridgeState {
    pub config: BridgeConfig,
    pub zones: ZonesFile,
    pub tracker: CursorTracker,
    pub zone_states: BTreeMap<ZoneId, ZoneState>,
    pub tcp_connected: bool,
    pub send_stats: SendStats,
    pub last_sent_frame: Option<FrameRecord>,
    pub sent_frames: VecDeque<FrameRecord>,
    pub errors: VecDeque<ErrorEntry>,
    /// Empty set = every zone is eligible for transmission.
    pub output_zone_filter: BTreeSet<ZoneId>,
    last_heartbeat_ms: u64,
}

impl BridgeState {
    fn new(config: BridgeConfig, zones: ZonesFile) -> Self {
        Self {
            config,
            zones,
            tracker: CursorTracker::new(),
            zone_states: BTreeMap::new(),
            tcp_connected: false,
            send_stats: SendStats::default(),
            last_sent_frame: None,
            sent_frames: VecDeque::new(),
            errors: VecDeque::new(),
            output_zone_filter: BTreeSet::new(),
            last_heartbeat_ms: 0,
        }
    }

    fn push_frame_record(&mut self, record: FrameRecord) {
        self.last_sent_frame = Some(record.clone());
        self.sent_frames.push_back(record);
        if self.sent_frames.len() > FRAME_HISTORY_CAP {
            self.sent_frames.pop_front();
        }
    }

    /// Applies an outcome to the record it belongs to. Returns the updated
    /// record, or `None` when the record was already evicted from history.
    fn update_frame_record(&mut self, id: u64, outcome: &SendOutcome) -> Option<FrameRecord> {
        let rec = self.sent_frames.iter_mut().find(|r| r.id == id)?;
        rec.sent = outcome.success;
        rec.bytes_sent = outcome.bytes_sent;
        rec.error = outcome.error.clone();
        let updated = rec.clone();
        if let Some(last) = &mut self.last_sent_frame {
            if last.id == id {
                *last = updated.clone();
            }
        }
        Some(updated)
    }

    fn push_error(&mut self, now_ms: u64, message: String) -> ErrorEntry {
        let entry = ErrorEntry { time: now_ms, message };
        self.errors.push_back(entry.clone());
        if self.errors.len() > ERROR_LOG_CAP {
            self.errors.pop_front();
        }
        entry
    }
}

/// Which infrastructure pieces a configuration update needs to re-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChanges {
    pub udp_port_changed: bool,
    pub transport_changed: bool,
    pub zones_changed: bool,
}

// ── Bridge service ────────────────────────────────────────────────────────────

/// The bridge use case. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct BridgeService {
    state: Arc<Mutex<BridgeState>>,
    transport: Arc<dyn FrameTransport>,
    events: broadcast::Sender<DashboardEvent>,
    frame_ids: Arc<AtomicU64>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BridgeService {
    pub fn new(
        config: BridgeConfig,
        zones: ZonesFile,
        transport: Arc<dyn FrameTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(BridgeState::new(config, zones))),
            transport,
            events,
            frame_ids: Arc::new(AtomicU64::new(1)),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribes a dashboard session to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DashboardEvent) {
        // No receivers is fine — the bridge runs headless most of the time.
        let _ = self.events.send(event);
    }

    /// Current configuration (cloned out of the state lock).
    pub async fn config(&self) -> BridgeConfig {
        self.state.lock().await.config.clone()
    }

    /// Current zone definitions (cloned out of the state lock).
    pub async fn zones(&self) -> ZonesFile {
        self.state.lock().await.zones.clone()
    }

    // ── Ingest path ───────────────────────────────────────────────────────────

    /// Decodes one UDP datagram and applies its TUIO commands.
    ///
    /// Decode errors are logged and pushed to the dashboard error log; they
    /// never fail the call.
    pub async fn ingest_datagram(&self, datagram: &[u8]) {
        let decoded = decode_packet(datagram);
        let now_ms = now_millis();

        let mut s = self.state.lock().await;
        for err in &decoded.errors {
            warn!("OSC decode error: {err}");
            let entry = s.push_error(now_ms, format!("OSC decode error: {err}"));
            self.emit(DashboardEvent::Error(entry));
        }

        let mut applied = false;
        for msg in &decoded.messages {
            if let Some(cmd) = parse_command(msg) {
                s.tracker.apply(&cmd, now_ms);
                applied = true;
            }
        }
        if applied {
            self.emit(DashboardEvent::Cursors(s.tracker.snapshot()));
        }
    }

    // ── The bridge loop ───────────────────────────────────────────────────────

    /// Runs the fixed-period loop until `running` clears.
    pub async fn run(&self, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("bridge loop started ({TICK_INTERVAL_MS} ms tick)");
        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            self.tick(now_millis()).await;
        }
        info!("bridge loop stopped");
    }

    /// One tick: expire stale cursors, recompute occupancy, diff, dispatch
    /// per strategy.
    pub async fn tick(&self, now_ms: u64) {
        let mut s = self.state.lock().await;

        let cursor_timeout_ms = s.config.cursor_timeout_ms;
        let expired = s.tracker.expire(cursor_timeout_ms, now_ms);
        if expired > 0 {
            debug!("expired {expired} stale cursor(s)");
            self.emit(DashboardEvent::Cursors(s.tracker.snapshot()));
        }

        let zone_config = s.config.zone_config(&s.zones);
        let cursors = s.tracker.snapshot();
        let new_states = compute_occupancy(&cursors, &zone_config, now_ms);
        let changed = changed_zones(&s.zone_states, &new_states);
        s.zone_states = new_states;

        if !changed.is_empty() {
            self.emit(DashboardEvent::ZoneStates(
                s.zone_states.iter().map(|(id, st)| (*id, *st)).collect(),
            ));
        }

        match s.config.send_strategy {
            SendStrategy::OnChange => {
                if !changed.is_empty() {
                    self.dispatch(&mut s, &changed, now_ms).await;
                }
            }
            SendStrategy::Heartbeat => {
                if now_ms.saturating_sub(s.last_heartbeat_ms) >= s.config.heartbeat_interval_ms {
                    let all: Vec<ZoneId> = s.zone_states.keys().copied().collect();
                    self.dispatch(&mut s, &all, now_ms).await;
                    s.last_heartbeat_ms = now_ms;
                }
            }
        }
    }

    /// Encodes and hands off frames for the candidate zones, applying the
    /// output filter. Candidates arrive in ascending id order and are sent
    /// in that order.
    async fn dispatch(&self, s: &mut BridgeState, candidates: &[ZoneId], now_ms: u64) {
        let selected: Vec<ZoneId> = if s.output_zone_filter.is_empty() {
            candidates.to_vec()
        } else {
            candidates
                .iter()
                .copied()
                .filter(|id| s.output_zone_filter.contains(id))
                .collect()
        };
        if selected.is_empty() {
            return;
        }

        let mut batch: Vec<(Frame, u64)> = Vec::with_capacity(selected.len());
        for zone_id in selected {
            let Some(state) = s.zone_states.get(&zone_id).copied() else {
                continue;
            };
            let encoded = frame::encode(zone_id, state.occupied);
            let record = FrameRecord {
                id: self.frame_ids.fetch_add(1, Ordering::Relaxed),
                zone_id,
                occupied: state.occupied,
                frame: frame::to_hex(&encoded),
                time: now_ms,
                tcp_connected: s.tcp_connected,
                sent: false,
                bytes_sent: 0,
                error: None,
            };
            s.push_frame_record(record.clone());
            self.emit(DashboardEvent::FrameSent(record.clone()));
            batch.push((encoded, record.id));
        }

        // One task per batch, sending sequentially, keeps the wire order
        // identical to the ascending record order.
        let this = self.clone();
        let handle = tokio::spawn(async move {
            for (encoded, record_id) in batch {
                this.finish_send(encoded, record_id).await;
            }
        });
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Awaits one transport outcome and folds it into counters and history.
    async fn finish_send(&self, encoded: Frame, record_id: u64) {
        let outcome = self.transport.send(encoded).await;

        let mut s = self.state.lock().await;
        s.send_stats.total += 1;
        if outcome.success {
            s.send_stats.success += 1;
        } else {
            s.send_stats.failed += 1;
            if let Some(err) = &outcome.error {
                debug!("frame {record_id} not delivered: {err}");
            }
        }
        if let Some(updated) = s.update_frame_record(record_id, &outcome) {
            self.emit(DashboardEvent::FrameSent(updated));
        }
        self.emit(DashboardEvent::SendStats(s.send_stats));
    }

    /// Awaits every outstanding send outcome. Used by tests and by the
    /// diagnostic path; normal shutdown does not wait.
    pub async fn flush_in_flight(&self) {
        let handles: Vec<JoinHandle<()>> = self.in_flight.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ── Collaborator surface ──────────────────────────────────────────────────

    /// Encodes and sends one frame outside the normal loop, returning the
    /// final record (with hex frame) and the transport outcome.
    pub async fn test_send(&self, zone_id: ZoneId, occupied: bool) -> (FrameRecord, SendOutcome) {
        let now_ms = now_millis();
        let encoded = frame::encode(zone_id, occupied);

        let record = {
            let mut s = self.state.lock().await;
            let record = FrameRecord {
                id: self.frame_ids.fetch_add(1, Ordering::Relaxed),
                zone_id,
                occupied,
                frame: frame::to_hex(&encoded),
                time: now_ms,
                tcp_connected: s.tcp_connected,
                sent: false,
                bytes_sent: 0,
                error: None,
            };
            s.push_frame_record(record.clone());
            record
        };
        self.emit(DashboardEvent::FrameSent(record.clone()));

        let outcome = self.transport.send(encoded).await;

        let (final_record, stats) = {
            let mut s = self.state.lock().await;
            s.send_stats.total += 1;
            if outcome.success {
                s.send_stats.success += 1;
            } else {
                s.send_stats.failed += 1;
            }
            let updated = s.update_frame_record(record.id, &outcome).unwrap_or(record);
            (updated, s.send_stats)
        };
        self.emit(DashboardEvent::FrameSent(final_record.clone()));
        self.emit(DashboardEvent::SendStats(stats));
        (final_record, outcome)
    }

    /// Replaces the runtime configuration and reports which infrastructure
    /// pieces must be re-pointed. Grid dimensions are written through to
    /// the zones file so the engine and the config surface stay coherent.
    pub async fn apply_config(&self, new: BridgeConfig) -> ConfigChanges {
        let mut new = new;
        new.grid_cols = new.grid_cols.max(1);
        new.grid_rows = new.grid_rows.max(1);

        let (old, zones_changed, zones) = {
            let mut s = self.state.lock().await;
            let old = s.config.clone();
            let mut zones_changed = false;
            if s.zones.grid.cols != new.grid_cols || s.zones.grid.rows != new.grid_rows {
                s.zones.grid = GridConfig {
                    cols: new.grid_cols,
                    rows: new.grid_rows,
                };
                zones_changed = true;
            }
            s.config = new.clone();
            (old, zones_changed, s.zones.clone())
        };

        info!(
            "configuration updated (udp {} → {}, tcp {:?} {}:{})",
            old.udp_port, new.udp_port, new.tcp_mode, new.tcp_host, new.tcp_port
        );
        self.emit(DashboardEvent::Config(new.clone()));
        if zones_changed {
            self.emit(DashboardEvent::Zones(zones));
        }

        ConfigChanges {
            udp_port_changed: old.udp_port != new.udp_port,
            transport_changed: old.transport_changed(&new),
            zones_changed,
        }
    }

    /// Replaces the zone definitions wholesale.
    pub async fn apply_zones(&self, zones: ZonesFile) {
        let mut zones = zones;
        zones.grid.cols = zones.grid.cols.max(1);
        zones.grid.rows = zones.grid.rows.max(1);

        {
            let mut s = self.state.lock().await;
            s.config.grid_cols = zones.grid.cols;
            s.config.grid_rows = zones.grid.rows;
            s.zones = zones.clone();
        }
        info!(
            "zone definitions updated ({}×{} grid, {} custom)",
            zones.grid.cols,
            zones.grid.rows,
            zones.custom.len()
        );
        self.emit(DashboardEvent::Zones(zones));
    }

    /// Replaces the output zone whitelist. Ids below 1 are dropped; an
    /// empty result means every zone is eligible.
    pub async fn set_output_filter(&self, zone_ids: Vec<ZoneId>) {
        let filter: BTreeSet<ZoneId> = zone_ids.into_iter().filter(|id| *id >= 1).collect();
        {
            let mut s = self.state.lock().await;
            s.output_zone_filter = filter.clone();
        }
        if filter.is_empty() {
            info!("output filter cleared — transmitting all zones");
        } else {
            info!("output filter set to {filter:?}");
        }
        self.emit(DashboardEvent::OutputZoneFilter(filter.into_iter().collect()));
    }

    /// Records a transport connectivity change.
    pub async fn set_tcp_connected(&self, connected: bool) {
        let changed = {
            let mut s = self.state.lock().await;
            let changed = s.tcp_connected != connected;
            s.tcp_connected = connected;
            changed
        };
        if changed {
            self.emit(DashboardEvent::TcpStatus { connected });
        }
    }

    /// Records an error into the bounded log and pushes it to the dashboard.
    pub async fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        let entry = {
            let mut s = self.state.lock().await;
            s.push_error(now_millis(), message)
        };
        self.emit(DashboardEvent::Error(entry));
    }

    /// The full snapshot a freshly connected dashboard session receives.
    pub async fn snapshot(&self) -> InitSnapshot {
        let s = self.state.lock().await;
        InitSnapshot {
            config: s.config.clone(),
            zones: s.zones.clone(),
            cursors: s.tracker.snapshot(),
            zone_states: s.zone_states.iter().map(|(id, st)| (*id, *st)).collect(),
            tcp_connected: s.tcp_connected,
            send_stats: s.send_stats,
            last_sent_frame: s.last_sent_frame.clone(),
            sent_frames: s
                .sent_frames
                .iter()
                .skip(s.sent_frames.len().saturating_sub(INIT_TAIL))
                .cloned()
                .collect(),
            errors: s
                .errors
                .iter()
                .skip(s.errors.len().saturating_sub(INIT_TAIL))
                .cloned()
                .collect(),
            output_zone_filter: s.output_zone_filter.iter().copied().collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
