//! HTTP and WebSocket handler definitions.
//!
//! `AppState` is the shared state carried through axum extractors: the
//! connection registry, the shutdown controller, and the dispatcher
//! context holding the game world.

pub mod health;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use crate::dispatch::ServerContext;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State`.
#[derive(Clone)]
pub struct AppState {
    /// Registry of all active WebSocket sessions.
    pub registry: Arc<ConnectionRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, TLS, per-connection settings).
    pub config: Arc<NetworkConfig>,
    /// Dispatcher context: world, services, broadcaster, token verifier.
    pub ctx: Arc<ServerContext>,
    /// Server process start time, for uptime reporting.
    pub start_time: Instant,
}
