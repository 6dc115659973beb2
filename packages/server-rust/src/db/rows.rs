//! Row types for the durable store.
//!
//! Timestamps are Unix epoch seconds (`DOUBLE PRECISION` columns) so the
//! same clock feeds both the cache and the database.

use sqlx::FromRow;

/// One row of the `players` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PlayerRow {
    pub id: i64,
    pub username: String,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub facing: String,
    pub current_hp: i32,
    pub max_hp: i32,
    pub is_banned: bool,
    /// When set and in the future, the account is timed out until then.
    pub timeout_until: Option<f64>,
}

/// The player-row fields the batch sync flushes (the `positions` category).
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStateUpdate {
    pub player_id: i64,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub facing: String,
    pub current_hp: i32,
    pub max_hp: i32,
}

/// One row of `player_inventory`, unique on `(player_id, slot)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct InventoryRow {
    pub player_id: i64,
    pub slot: i32,
    pub item_id: i32,
    pub quantity: i32,
    pub current_durability: Option<i32>,
}

/// One row of `player_equipment`, unique on `(player_id, equipment_slot)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EquipmentRow {
    pub player_id: i64,
    pub equipment_slot: String,
    pub item_id: i32,
    pub quantity: i32,
    pub current_durability: Option<i32>,
}

/// One row of `player_skills` joined with `skills` for the name.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SkillRow {
    pub player_id: i64,
    pub skill: String,
    pub current_level: i32,
    pub experience: i64,
}

/// One row of `ground_items`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GroundItemRow {
    pub id: i64,
    pub item_id: i32,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub quantity: i32,
    pub current_durability: Option<i32>,
    pub dropped_by: Option<i64>,
    pub dropped_at: f64,
    pub public_at: f64,
    pub despawn_at: f64,
}
