//! Application layer: the bridge use case.
//!
//! [`bridge_service::BridgeService`] orchestrates the domain pieces —
//! cursor tracking, occupancy, frame encoding — behind one guarded state
//! object, and reaches the network only through the
//! [`bridge_service::FrameTransport`] trait so the dispatch rules stay
//! testable without sockets.

pub mod bridge_service;

pub use bridge_service::{BridgeService, ConfigChanges, FrameTransport, SendOutcome};
