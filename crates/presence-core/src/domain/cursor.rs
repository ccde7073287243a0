//! Cursor lifecycle tracking.
//!
//! The tracker maintains the set of live TUIO cursors keyed by session id.
//! Cursors appear on the first `set`, refresh on every subsequent `set`,
//! and disappear in one of two ways: a non-empty `alive` list that omits
//! them, or the periodic timeout sweep. An *empty* `alive` list removes
//! nothing — trackers driving a single touch point emit `alive` with no ids
//! between contacts, and treating that as "everyone left" makes occupancy
//! flicker. That asymmetry is deliberate and must not be "fixed".

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::protocol::tuio::TuioCommand;

/// One tracked cursor with normalized coordinates and a freshness stamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cursor {
    /// TUIO session id.
    pub id: i32,
    /// Horizontal position, clamped to [0, 1].
    pub x: f32,
    /// Vertical position, clamped to [0, 1].
    pub y: f32,
    /// Epoch milliseconds of the last `set` that touched this cursor.
    pub last_update_ms: u64,
}

/// The set of live cursors. Exclusively owned by the bridge state; all
/// mutation goes through [`apply`](CursorTracker::apply) and
/// [`expire`](CursorTracker::expire).
#[derive(Debug, Default)]
pub struct CursorTracker {
    cursors: HashMap<i32, Cursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one TUIO command.
    pub fn apply(&mut self, command: &TuioCommand, now_ms: u64) {
        match command {
            TuioCommand::Set { id, x, y } => {
                self.cursors.insert(
                    *id,
                    Cursor {
                        id: *id,
                        x: x.clamp(0.0, 1.0),
                        y: y.clamp(0.0, 1.0),
                        last_update_ms: now_ms,
                    },
                );
            }
            TuioCommand::Alive(ids) => {
                // Empty list: leave everything to the timeout sweep.
                if !ids.is_empty() {
                    let keep: HashSet<i32> = ids.iter().copied().collect();
                    self.cursors.retain(|id, _| keep.contains(id));
                }
            }
            TuioCommand::Fseq(_) => {}
        }
    }

    /// Removes every cursor whose last update is older than `timeout_ms`.
    /// Returns the number of cursors removed.
    pub fn expire(&mut self, timeout_ms: u64, now_ms: u64) -> usize {
        let before = self.cursors.len();
        self.cursors
            .retain(|_, c| now_ms.saturating_sub(c.last_update_ms) <= timeout_ms);
        before - self.cursors.len()
    }

    /// Returns the live cursors sorted by id (stable ordering for events
    /// and occupancy computation).
    pub fn snapshot(&self) -> Vec<Cursor> {
        let mut cursors: Vec<Cursor> = self.cursors.values().copied().collect();
        cursors.sort_by_key(|c| c.id);
        cursors
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.cursors.contains_key(&id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
