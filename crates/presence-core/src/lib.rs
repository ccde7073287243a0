//! # presence-core
//!
//! Shared library for the TUIO presence bridge: the inbound OSC/TUIO wire
//! decoder, the outbound 8-byte presence frame codec, and the pure domain
//! logic that turns tracked cursors into per-zone occupancy.
//!
//! The crate has no dependencies on sockets, OS APIs, or an async runtime;
//! the daemon in `presence-bridge` wires these pieces to real I/O.
//!
//! - **`protocol`** – how bytes travel: OSC messages and bundles in from
//!   the tracker, checksummed presence frames out to the device.
//! - **`domain`** – the rules: cursor lifecycle (upsert, alive lists,
//!   timeout expiry) and zone occupancy (grid or ordered rectangles,
//!   rebuilt from scratch every tick).

pub mod domain;
pub mod protocol;

pub use domain::cursor::{Cursor, CursorTracker};
pub use domain::zone::{
    changed_zones, compute_occupancy, GridConfig, ZoneConfig, ZoneId, ZoneMode, ZoneRect,
    ZoneState,
};
pub use protocol::frame::{self, Frame};
pub use protocol::osc::{decode_packet, DecodedPacket, OscArg, OscError, OscMessage};
pub use protocol::tuio::{parse_command, TuioCommand};
