//! Domain types for the daemon: runtime configuration and the dashboard
//! JSON protocol. No I/O here; the infrastructure layer reads and writes
//! these types over sockets and disk.

pub mod config;
pub mod messages;

pub use config::{BridgeConfig, SendStrategy, TcpMode, ZonesFile};
pub use messages::{
    DashboardCommand, DashboardEvent, ErrorEntry, FrameRecord, InitSnapshot, SendStats,
};
