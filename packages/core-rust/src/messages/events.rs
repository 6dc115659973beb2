//! Server-to-client payloads: command responses and pushed events.

use serde::{Deserialize, Serialize};

use crate::skills::SkillType;
use crate::types::{EntityState, EquipmentSlot, Position};

/// One occupied inventory slot as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlotView {
    pub slot: u32,
    pub item_id: u32,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_durability: Option<u32>,
}

/// One equipped item as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentView {
    pub slot: EquipmentSlot,
    pub item_id: u32,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_durability: Option<u32>,
}

/// One skill's level and experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillView {
    pub skill: SkillType,
    pub level: u32,
    pub experience: u64,
}

/// One ground item as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundItemView {
    pub id: i64,
    pub item_id: u32,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub quantity: u32,
}

/// The joining player's identity and vitals inside `event_welcome`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: i64,
    pub username: String,
    pub position: Position,
    pub facing: String,
    pub current_hp: i32,
    pub max_hp: i32,
}

/// Client-relevant game tuning inside `event_welcome`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub chunk_size: i32,
    pub movement_cooldown_secs: f64,
}

/// Payload for `event_welcome`, sent once after successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub player: PlayerInfo,
    pub config: GameConfig,
    pub skills: Vec<SkillView>,
    pub inventory: Vec<InventorySlotView>,
    pub equipment: Vec<EquipmentView>,
}

/// Per-tick delta for one nearby player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub id: i64,
    pub username: String,
    pub x: i32,
    pub y: i32,
    pub facing: String,
    pub current_hp: i32,
    pub max_hp: i32,
}

/// Per-tick delta for one nearby entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub instance_id: i64,
    pub entity_id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub current_hp: i32,
    pub max_hp: i32,
    pub state: EntityState,
}

/// Payload for `event_state_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdatePayload {
    pub players: Vec<PlayerDelta>,
    pub entities: Vec<EntityDelta>,
}

/// Payload for `event_player_died`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDiedPayload {
    pub player_id: i64,
    pub position: Position,
}

/// Payload for `event_player_respawn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRespawnPayload {
    pub player_id: i64,
    pub position: Position,
    pub current_hp: i32,
    pub max_hp: i32,
}

/// Payload for `event_chunk_data`, answering `cmd_chunk_request`.
///
/// `tiles` and `collision` are row-major `size x size` grids; chunks that
/// extend past the map edge are padded with tile 0 / blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDataPayload {
    pub map_id: String,
    pub cx: i32,
    pub cy: i32,
    pub size: i32,
    pub tiles: Vec<Vec<u16>>,
    pub collision: Vec<Vec<bool>>,
}

/// Payload for `event_chat_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub channel: String,
    pub from: String,
    pub text: String,
    pub timestamp: f64,
}

/// Payload for `event_player_disconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnectPayload {
    pub player_id: i64,
    pub username: String,
}

/// Payload for `event_server_shutdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerShutdownPayload {
    pub message: String,
}

/// Payload for `event_inventory_update`: the full current inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdatePayload {
    pub slots: Vec<InventorySlotView>,
}

/// Payload for `event_equipment_update`: the full current equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentUpdatePayload {
    pub slots: Vec<EquipmentView>,
}

/// Payload for `event_skill_update`, emitted when experience is gained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUpdatePayload {
    pub skill: SkillType,
    pub previous_level: u32,
    pub current_level: u32,
    pub experience: u64,
    pub leveled_up: bool,
}

/// Payload for `event_ground_item_spawn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundItemSpawnPayload {
    pub ground_item: GroundItemView,
}

/// Payload for `event_ground_item_despawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundItemDespawnPayload {
    pub ground_id: i64,
}

/// `resp_success` payload for `cmd_move`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOkPayload {
    pub new_position: Position,
}

/// Skill experience granted by one attack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpGained {
    pub attack: u64,
    pub strength: u64,
    pub hitpoints: u64,
}

/// `resp_success` payload for `cmd_attack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOkPayload {
    pub hit: bool,
    pub damage: i32,
    pub defender_hp: i32,
    pub defender_died: bool,
    pub xp_gained: XpGained,
}

/// `resp_error` payload.
///
/// `error_code` is the machine-readable reason (`rate_limited`, `blocked`,
/// ...); the optional fields carry reason-specific detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
    /// Seconds until the next move is allowed (`rate_limited` only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cooldown_remaining: Option<f64>,
    /// Whether the failure was a collision (`blocked` only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collision: Option<bool>,
}

impl ErrorPayload {
    /// Builds an error payload with a code and human-readable message.
    #[must_use]
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: Some(error_code.into()),
            cooldown_remaining: None,
            collision: None,
        }
    }
}
