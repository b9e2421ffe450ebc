//! wsrelay Library
//!
//! WebSocket Fan-Out Relay Server Library
//!
//! Accepts WebSocket connections on one or two listening ports and forwards
//! every message received on the source port to all clients connected to the
//! target port. When both ports are configured identically, a single listener
//! serves both roles and messages are echoed to every other client on the
//! same port.

pub mod config;
pub mod connection;
pub mod metrics;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionRegistry, Group};
pub use relay::{RelayEngine, RelayMode};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay server
pub type Result<T> = anyhow::Result<T>;
