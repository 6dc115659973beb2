//! Tilefall server: the authoritative game server for a tile-based
//! multiplayer RPG world.
//!
//! Layering, inside out: the [`cache`] holds the authoritative hot copy of
//! all mutable state; the [`state`] managers enforce invariants per entity
//! class and mark dirty state; [`state::BatchSyncCoordinator`] drains
//! dirty state into the [`db`] durable store; the [`service`] layer runs
//! the game rules; [`dispatch`] maps wire envelopes onto services; and
//! [`network`] owns the WebSocket sessions and graceful shutdown. The
//! [`ai`] ticker drives entities and periodic sweeps.

pub mod ai;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod events;
pub mod maps;
pub mod network;
pub mod service;
pub mod state;
pub mod world;

pub use config::ServerArgs;
pub use dispatch::ServerContext;
pub use world::{GameSettings, World};
