//! Durable store: the PostgreSQL persistence boundary.
//!
//! Only three paths touch it: player creation, login hydration, and the
//! batch sync coordinator. Everything else reads and writes the cache.

pub mod null;
pub mod postgres;
pub mod rows;
pub mod store;

pub use null::NullStore;
pub use postgres::PgStore;
pub use rows::{
    EquipmentRow, GroundItemRow, InventoryRow, PlayerRow, PlayerStateUpdate, SkillRow,
};
pub use store::DurableStore;
