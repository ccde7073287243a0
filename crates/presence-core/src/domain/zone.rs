//! Zone configuration and the occupancy engine.
//!
//! A zone is a spatial region of the normalized [0,1]×[0,1] touch surface
//! with a binary occupancy state. Zones come in two flavours: a uniform
//! grid (`id = row·cols + col + 1`) or an ordered list of arbitrary
//! rectangles. The engine is stateless: every call to [`compute_occupancy`]
//! rebuilds the full state map from the current cursor snapshot, and change
//! detection happens by diffing against the previous map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::cursor::Cursor;

/// Identifies a zone. Custom zones use ids in the device range 1..=255;
/// grid ids can exceed that for large grids and are clamped at the frame
/// encoder, never here.
pub type ZoneId = u16;

/// Whether zones are derived from a grid or from explicit rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    Grid,
    Custom,
}

/// Grid dimensions. `cols` and `rows` are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub cols: u16,
    pub rows: u16,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cols: 1, rows: 4 }
    }
}

/// One custom rectangular zone in normalized coordinates.
///
/// Containment is inclusive on all four edges, so rectangles that share an
/// edge both contain a cursor sitting exactly on it — declaration order
/// decides the winner (see [`compute_occupancy`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRect {
    pub id: ZoneId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ZoneRect {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// The active zone configuration handed to the engine.
///
/// `custom` is an explicitly ordered `Vec`: first-match-wins assignment
/// depends on this order, so it is part of the configuration, never an
/// artifact of a container's iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub mode: ZoneMode,
    pub grid: GridConfig,
    pub custom: Vec<ZoneRect>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            mode: ZoneMode::Grid,
            grid: GridConfig::default(),
            custom: Vec::new(),
        }
    }
}

impl ZoneConfig {
    /// The ids this configuration defines, in ascending order for grid mode
    /// and declaration order for custom mode.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        match self.mode {
            ZoneMode::Grid => (1..=self.grid.cols.saturating_mul(self.grid.rows)).collect(),
            ZoneMode::Custom => self.custom.iter().map(|z| z.id).collect(),
        }
    }

    pub fn zone_count(&self) -> usize {
        match self.mode {
            ZoneMode::Grid => self.grid.cols.saturating_mul(self.grid.rows) as usize,
            ZoneMode::Custom => self.custom.len(),
        }
    }
}

/// Occupancy of one zone at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub occupied: bool,
    /// Epoch milliseconds. For occupied zones this is the moment a cursor
    /// first matched during the computation; for unoccupied zones it is the
    /// tick's `now` — the map is rebuilt from scratch each call, so an
    /// unoccupied zone's stamp does not survive from its last real
    /// transition. The dashboard's "time since change" readout depends on
    /// this behaviour.
    pub last_change_ms: u64,
}

/// Computes the occupancy of every configured zone from a cursor snapshot.
///
/// Every zone starts unoccupied with `last_change_ms = now_ms` and flips to
/// occupied the first time a cursor matches it. Grid cursors map through
/// the id formula with out-of-range results discarded; custom cursors are
/// assigned to the **first** rectangle containing them and tested against
/// no further rectangles.
///
/// The result is a `BTreeMap` so that downstream iteration (dispatch order,
/// dashboard listing) is deterministic ascending-id order.
pub fn compute_occupancy(
    cursors: &[Cursor],
    config: &ZoneConfig,
    now_ms: u64,
) -> BTreeMap<ZoneId, ZoneState> {
    let mut states: BTreeMap<ZoneId, ZoneState> = config
        .zone_ids()
        .into_iter()
        .map(|id| {
            (
                id,
                ZoneState {
                    occupied: false,
                    last_change_ms: now_ms,
                },
            )
        })
        .collect();

    match config.mode {
        ZoneMode::Grid => {
            let cols = config.grid.cols.max(1) as i64;
            let rows = config.grid.rows.max(1) as i64;
            let zone_width = 1.0 / cols as f32;
            let zone_height = 1.0 / rows as f32;

            for cursor in cursors {
                let col = (cursor.x / zone_width).floor() as i64;
                let row = (cursor.y / zone_height).floor() as i64;
                let zone_id = row * cols + col + 1;
                if zone_id >= 1 && zone_id <= cols * rows {
                    mark_occupied(&mut states, zone_id as ZoneId, now_ms);
                }
            }
        }
        ZoneMode::Custom => {
            for cursor in cursors {
                // First declared rectangle containing the cursor wins.
                if let Some(zone) = config.custom.iter().find(|z| z.contains(cursor.x, cursor.y))
                {
                    mark_occupied(&mut states, zone.id, now_ms);
                }
            }
        }
    }

    states
}

fn mark_occupied(states: &mut BTreeMap<ZoneId, ZoneState>, id: ZoneId, now_ms: u64) {
    if let Some(state) = states.get_mut(&id) {
        if !state.occupied {
            state.occupied = true;
            state.last_change_ms = now_ms;
        }
    }
}

/// Returns the ids whose occupancy differs between two consecutive maps,
/// in ascending order. A zone missing from `old` (fresh configuration)
/// counts as changed.
pub fn changed_zones(
    old: &BTreeMap<ZoneId, ZoneState>,
    new: &BTreeMap<ZoneId, ZoneState>,
) -> Vec<ZoneId> {
    new.iter()
        .filter(|(id, state)| match old.get(id) {
            Some(prev) => prev.occupied != state.occupied,
            None => true,
        })
        .map(|(id, _)| *id)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
