//! Health, liveness, and readiness endpoints.
//!
//! The only HTTP surface besides the WebSocket upgrade. Orchestrators use
//! these to gate traffic during startup and the shutdown drain.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Detailed health JSON. Always 200; the `state` field tells monitoring
/// apart "up but draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let online = state
        .ctx
        .world
        .players
        .online_player_ids()
        .await
        .map(|ids| ids.len())
        .unwrap_or(0);

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "connections": state.registry.count(),
        "online_players": online,
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: the process is running. Always 200.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 once serving, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::dispatch::ServerContext;
    use crate::network::{ConnectionConfig, ConnectionRegistry, NetworkConfig, ShutdownController};
    use crate::world::test_world;

    fn test_state() -> AppState {
        let (world, _) = test_world();
        let registry = Arc::new(ConnectionRegistry::new());
        AppState {
            ctx: ServerContext::new(world, Arc::clone(&registry), "secret", "samplemap"),
            registry,
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_state_and_counts() {
        let state = test_state();
        state.shutdown.set_ready();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "ready");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["online_players"], 0);
        assert_eq!(json["in_flight"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining_and_counts_connections() {
        let state = test_state();
        state.shutdown.set_ready();
        let (_handle, _rx) = state.registry.register(&ConnectionConfig::default());
        state.shutdown.begin_shutdown();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "draining");
        assert_eq!(json["connections"], 1);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);
        state.shutdown.begin_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
