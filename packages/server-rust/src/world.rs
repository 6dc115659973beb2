//! The world: every manager and shared resource wired together once at
//! startup and injected into services and handlers.
//!
//! There are no process-wide mutable globals; everything hangs off one
//! `Arc<World>`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tilefall_core::clock::ClockSource;
use tilefall_core::constants::{
    GROUND_ITEM_DESPAWN_SECS, GROUND_ITEM_PRIVACY_SECS, MOVEMENT_COOLDOWN_SECS,
};

use crate::cache::CacheEngine;
use crate::db::DurableStore;
use crate::maps::MapManager;
use crate::state::{
    BatchSyncCoordinator, EntityManager, EquipmentManager, GroundItemManager, InventoryManager,
    PlayerStateManager, ReferenceData, SkillsManager,
};

/// Game-rule tuning, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct GameSettings {
    /// Minimum interval between two moves of one player.
    pub movement_cooldown_secs: f64,
    /// Ground-item privacy window.
    pub ground_item_privacy_secs: f64,
    /// Ground-item lifetime.
    pub ground_item_despawn_secs: f64,
    /// Hold time in the `dying` state before removal.
    pub entity_dying_secs: f64,
    /// Radius of the per-tick state update around each player.
    pub state_update_radius: i32,
    /// Budget for one batch sync cycle.
    pub sync_cycle_deadline: Duration,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            movement_cooldown_secs: MOVEMENT_COOLDOWN_SECS,
            ground_item_privacy_secs: GROUND_ITEM_PRIVACY_SECS,
            ground_item_despawn_secs: GROUND_ITEM_DESPAWN_SECS,
            entity_dying_secs: tilefall_core::constants::ENTITY_DYING_SECS,
            state_update_radius: 15,
            sync_cycle_deadline: Duration::from_secs(2),
        }
    }
}

/// All shared game state and managers.
pub struct World {
    pub clock: Arc<dyn ClockSource>,
    pub cache: Arc<dyn CacheEngine>,
    pub store: Arc<dyn DurableStore>,
    pub reference: Arc<ReferenceData>,
    pub maps: Arc<MapManager>,
    pub players: Arc<PlayerStateManager>,
    pub inventories: Arc<InventoryManager>,
    pub equipment: Arc<EquipmentManager>,
    pub skills: Arc<SkillsManager>,
    pub ground_items: Arc<GroundItemManager>,
    pub entities: Arc<EntityManager>,
    pub sync: Arc<BatchSyncCoordinator>,
    pub settings: GameSettings,
    /// Seedable source for all combat randomness (deterministic in tests).
    pub rng: Mutex<StdRng>,
}

impl World {
    /// Wires the managers and coordinator over the given backends.
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn ClockSource>,
        maps: Arc<MapManager>,
        settings: GameSettings,
        rng_seed: Option<u64>,
    ) -> Arc<Self> {
        let reference = Arc::new(ReferenceData::builtin());

        let players = Arc::new(PlayerStateManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let inventories = Arc::new(InventoryManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&reference),
        ));
        let equipment = Arc::new(EquipmentManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&reference),
            Arc::clone(&inventories),
        ));
        let skills = Arc::new(SkillsManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&reference),
        ));
        let ground_items = Arc::new(GroundItemManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&inventories),
            settings.ground_item_privacy_secs,
            settings.ground_item_despawn_secs,
        ));
        let entities = Arc::new(EntityManager::new(Arc::clone(&cache), Arc::clone(&clock)));
        let sync = Arc::new(BatchSyncCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&players),
            Arc::clone(&inventories),
            Arc::clone(&equipment),
            Arc::clone(&skills),
            Arc::clone(&ground_items),
            settings.sync_cycle_deadline,
        ));

        let rng = Mutex::new(match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        });

        Arc::new(Self {
            clock,
            cache,
            store,
            reference,
            maps,
            players,
            inventories,
            equipment,
            skills,
            ground_items,
            entities,
            sync,
            settings,
            rng,
        })
    }
}

/// Builds a cache-only world on a frozen clock. Shared by unit tests
/// across the crate.
#[cfg(test)]
pub(crate) fn test_world() -> (Arc<World>, Arc<tilefall_core::clock::ManualClock>) {
    use crate::cache::MemoryCache;
    use crate::db::NullStore;
    use crate::maps::WorldMap;

    let clock = Arc::new(tilefall_core::clock::ManualClock::new(1000.0));
    let mut maps = MapManager::new();
    maps.insert(WorldMap::open_field("samplemap", 64, 64));
    let world = World::new(
        Arc::new(MemoryCache::new()),
        Arc::new(NullStore),
        Arc::clone(&clock) as Arc<dyn ClockSource>,
        Arc::new(maps),
        GameSettings::default(),
        Some(42),
    );
    (world, clock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_wires_shared_managers() {
        let (world, _) = test_world();
        assert!(world.reference.item_count() > 0);
        assert!(world.maps.get("samplemap").is_some());
    }
}
