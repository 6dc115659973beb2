//! Wire protocol for the Tilefall game server.
//!
//! Every frame is one MsgPack map in the [`Envelope`] shape; the envelope's
//! `type` string selects a payload struct from [`commands`] (client to
//! server) or [`events`] (server to client). All payloads serialize as
//! named maps (`rmp_serde::to_vec_named`) with snake_case keys.

pub mod commands;
pub mod envelope;
pub mod events;

pub use commands::{
    AttackPayload, AuthenticatePayload, ChunkRequestPayload, DropItemPayload, EquipItemPayload,
    MoveInventoryItemPayload, MovePayload, PickupItemPayload, SendChatMessagePayload,
    UnequipItemPayload,
};
pub use envelope::{Envelope, RESP_ERROR, RESP_SUCCESS};
pub use events::{
    AttackOkPayload, ChatMessagePayload, ChunkDataPayload, EntityDelta, EquipmentUpdatePayload,
    EquipmentView, ErrorPayload, GameConfig, GroundItemDespawnPayload, GroundItemSpawnPayload,
    GroundItemView, InventorySlotView, InventoryUpdatePayload, MoveOkPayload, PlayerDelta,
    PlayerDiedPayload, PlayerDisconnectPayload, PlayerInfo, PlayerRespawnPayload,
    ServerShutdownPayload, SkillUpdatePayload, SkillView, StateUpdatePayload, WelcomePayload,
    XpGained,
};

/// Message type strings.
///
/// Commands come from clients, responses echo the command id, events are
/// pushed by the server with fresh ids.
pub mod msg {
    pub const CMD_AUTHENTICATE: &str = "cmd_authenticate";
    pub const CMD_MOVE: &str = "cmd_move";
    pub const CMD_ATTACK: &str = "cmd_attack";
    pub const CMD_CHUNK_REQUEST: &str = "cmd_chunk_request";
    pub const CMD_MOVE_INVENTORY_ITEM: &str = "cmd_move_inventory_item";
    pub const CMD_SORT_INVENTORY: &str = "cmd_sort_inventory";
    pub const CMD_DROP_ITEM: &str = "cmd_drop_item";
    pub const CMD_PICKUP_ITEM: &str = "cmd_pickup_item";
    pub const CMD_EQUIP_ITEM: &str = "cmd_equip_item";
    pub const CMD_UNEQUIP_ITEM: &str = "cmd_unequip_item";
    pub const CMD_SEND_CHAT_MESSAGE: &str = "cmd_send_chat_message";

    pub const RESP_SUCCESS: &str = super::RESP_SUCCESS;
    pub const RESP_ERROR: &str = super::RESP_ERROR;

    pub const EVENT_WELCOME: &str = "event_welcome";
    pub const EVENT_STATE_UPDATE: &str = "event_state_update";
    pub const EVENT_PLAYER_DIED: &str = "event_player_died";
    pub const EVENT_PLAYER_RESPAWN: &str = "event_player_respawn";
    pub const EVENT_CHUNK_DATA: &str = "event_chunk_data";
    pub const EVENT_CHAT_MESSAGE: &str = "event_chat_message";
    pub const EVENT_PLAYER_DISCONNECT: &str = "event_player_disconnect";
    pub const EVENT_SERVER_SHUTDOWN: &str = "event_server_shutdown";
    pub const EVENT_INVENTORY_UPDATE: &str = "event_inventory_update";
    pub const EVENT_EQUIPMENT_UPDATE: &str = "event_equipment_update";
    pub const EVENT_SKILL_UPDATE: &str = "event_skill_update";
    pub const EVENT_GROUND_ITEM_SPAWN: &str = "event_ground_item_spawn";
    pub const EVENT_GROUND_ITEM_DESPAWN: &str = "event_ground_item_despawn";
}
