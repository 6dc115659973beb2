//! Durable store trait.
//!
//! The relational database is a lagging replica of the cache: command
//! handlers never touch it directly. It is read on login hydration and at
//! startup (active ground items), and written by the batch sync
//! coordinator and player creation. `Box`/`Arc`-dyn friendly so tests can
//! swap in [`NullStore`](super::NullStore) or a recording fake.

use async_trait::async_trait;

use super::rows::{
    EquipmentRow, GroundItemRow, InventoryRow, PlayerRow, PlayerStateUpdate, SkillRow,
};

/// Persistence boundary for all durable game state.
#[async_trait]
pub trait DurableStore: Send + Sync {
    // --- Hydration reads ---

    /// Loads a player row by id. `None` if the player does not exist.
    async fn load_player(&self, player_id: i64) -> anyhow::Result<Option<PlayerRow>>;

    /// Loads a player's inventory rows, ordered by slot.
    async fn load_inventory(&self, player_id: i64) -> anyhow::Result<Vec<InventoryRow>>;

    /// Loads a player's equipment rows.
    async fn load_equipment(&self, player_id: i64) -> anyhow::Result<Vec<EquipmentRow>>;

    /// Loads a player's skill rows.
    async fn load_skills(&self, player_id: i64) -> anyhow::Result<Vec<SkillRow>>;

    /// Loads all ground items that have not despawned by `now`.
    async fn load_active_ground_items(&self, now: f64) -> anyhow::Result<Vec<GroundItemRow>>;

    // --- Sync writes (idempotent upserts) ---

    /// Upserts the player-row state (position, facing, HP).
    async fn save_player_state(&self, update: &PlayerStateUpdate) -> anyhow::Result<()>;

    /// Replaces a player's inventory with the given snapshot.
    async fn replace_inventory(&self, player_id: i64, rows: &[InventoryRow])
        -> anyhow::Result<()>;

    /// Replaces a player's equipment with the given snapshot.
    async fn replace_equipment(&self, player_id: i64, rows: &[EquipmentRow])
        -> anyhow::Result<()>;

    /// Upserts a player's skills by `(player_id, skill)`.
    async fn upsert_skills(&self, player_id: i64, rows: &[SkillRow]) -> anyhow::Result<()>;

    /// Upserts one ground item by id.
    async fn upsert_ground_item(&self, row: &GroundItemRow) -> anyhow::Result<()>;

    /// Deletes one ground item by id. Deleting an absent row is a no-op.
    async fn delete_ground_item(&self, ground_id: i64) -> anyhow::Result<()>;
}
