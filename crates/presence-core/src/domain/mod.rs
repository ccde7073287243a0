//! Domain logic: cursor lifecycle tracking and zone occupancy.
//!
//! Everything in this module is pure — no sockets, no timers, no OS APIs.
//! Time enters exclusively as an epoch-millisecond argument, which keeps
//! the expiry and occupancy rules directly testable.

pub mod cursor;
pub mod zone;
