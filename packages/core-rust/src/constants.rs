//! Game tuning constants shared by server and protocol.
//!
//! Values here are defaults; the server config can override the timing
//! knobs at startup.

/// Minimum wall-clock interval between two moves of one player (seconds).
pub const MOVEMENT_COOLDOWN_SECS: f64 = 0.5;

/// Number of inventory slots per player. Slot indices are sparse within
/// `0..MAX_INVENTORY_SLOTS`.
pub const MAX_INVENTORY_SLOTS: u32 = 28;

/// Side length of a map chunk in tiles.
pub const CHUNK_SIZE: i32 = 16;

/// Window after a drop during which only the dropper sees the item (seconds).
pub const GROUND_ITEM_PRIVACY_SECS: f64 = 60.0;

/// Time after a drop at which the item is removed from the world (seconds).
pub const GROUND_ITEM_DESPAWN_SECS: f64 = 300.0;

/// Hold time in the `dying` state before an entity is removed (seconds).
pub const ENTITY_DYING_SECS: f64 = 1.5;

/// Melee XP per point of damage dealt, for attack and strength.
pub const XP_PER_DAMAGE: u32 = 4;

// Stack size tiers (base-2 except currency).
pub const STACK_SIZE_SINGLE: u32 = 1;
pub const STACK_SIZE_MATERIALS: u32 = 64;
pub const STACK_SIZE_CONSUMABLES: u32 = 64;
pub const STACK_SIZE_AMMUNITION: u32 = 8192;
pub const STACK_SIZE_CURRENCY: u32 = i32::MAX as u32;
