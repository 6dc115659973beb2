//! Game state managers: the façade layer between command handlers and the
//! hot cache.
//!
//! One manager per entity class. Every mutator writes the cache
//! authoritative copy and marks the owning player dirty; the
//! [`BatchSyncCoordinator`] later drains dirty state to the durable store.

pub mod entities;
pub mod equipment;
pub mod ground_items;
pub mod inventory;
pub mod player;
pub mod reference;
pub mod skills;
pub mod sync;

pub use entities::{DueRespawn, EntityDamageOutcome, EntityInstance, EntityManager};
pub use equipment::{EquipOutcome, EquipmentManager};
pub use ground_items::{GroundItem, GroundItemManager, PickupOutcome};
pub use inventory::{InventoryManager, SlotRecord};
pub use player::{
    CombatState, DamageOutcome, HpState, PlayerStateManager, PositionState,
};
pub use reference::ReferenceData;
pub use skills::{SkillRecord, SkillsManager, XpAward};
pub use sync::{BatchSyncCoordinator, SyncStats};
