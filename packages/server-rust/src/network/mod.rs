//! Networking: configuration, connection registry, session handlers, and
//! graceful shutdown.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{ConnectionConfig, NetworkConfig, TlsConfig};
pub use connection::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundMessage, SendError, SessionInfo,
};
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
