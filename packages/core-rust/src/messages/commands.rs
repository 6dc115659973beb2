//! Client-to-server command payloads.
//!
//! Field names are the wire names; the envelope `type` string selects which
//! payload struct the dispatcher decodes.

use serde::{Deserialize, Serialize};

use crate::types::CombatTargetType;

/// Payload for `cmd_authenticate`. Must be the first command on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    /// Bearer token (JWT) issued by the auth endpoint.
    pub token: String,
}

/// Payload for `cmd_move`.
///
/// The direction is a free string on the wire; the movement service
/// validates it (and reports `invalid_direction` for garbage) so a bad
/// direction is a game-rule error, not a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub direction: String,
}

/// Payload for `cmd_attack`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPayload {
    pub target_type: CombatTargetType,
    pub target_id: i64,
}

/// Payload for `cmd_chunk_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequestPayload {
    pub map_id: String,
    /// Chunk X index (tile x / chunk size).
    pub cx: i32,
    /// Chunk Y index (tile y / chunk size).
    pub cy: i32,
}

/// Payload for `cmd_move_inventory_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInventoryItemPayload {
    pub from_slot: u32,
    pub to_slot: u32,
}

/// Payload for `cmd_drop_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropItemPayload {
    pub slot: u32,
    pub quantity: u32,
}

/// Payload for `cmd_pickup_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupItemPayload {
    pub ground_id: i64,
}

/// Payload for `cmd_equip_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipItemPayload {
    pub inv_slot: u32,
}

/// Payload for `cmd_unequip_item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnequipItemPayload {
    pub eq_slot: String,
}

/// Payload for `cmd_send_chat_message`.
///
/// `channel` is `global`, `local`, or `dm:<username>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendChatMessagePayload {
    pub channel: String,
    pub text: String,
}
