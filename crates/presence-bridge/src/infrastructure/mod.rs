//! Infrastructure layer: OS-facing adapters — UDP and TCP sockets, the
//! dashboard WebSocket server, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`,
//! and `presence_core`, but must not be imported by them.

pub mod dashboard;
pub mod storage;
pub mod transport;
pub mod tuio_listener;
