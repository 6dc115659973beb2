//! Batch sync coordinator: drains dirty state from the cache into the
//! durable store.
//!
//! Runs on a timer and once more on shutdown. Each cycle snapshot-drains
//! the per-category dirty sets, flushes one consistent snapshot per
//! `(player, category)`, and re-marks ids whose flush failed so nothing is
//! ever dropped on a transient error. Holds one-way references to the
//! managers; no manager knows the coordinator exists.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::{CacheEngine, DirtyCategory};
use crate::db::{DurableStore, PlayerStateUpdate};

use super::equipment::EquipmentManager;
use super::ground_items::GroundItemManager;
use super::inventory::InventoryManager;
use super::player::PlayerStateManager;
use super::skills::SkillsManager;

/// Counts of what one sync cycle flushed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub positions: usize,
    pub inventories: usize,
    pub equipment: usize,
    pub skills: usize,
    pub ground_upserts: usize,
    pub ground_deletes: usize,
    /// Flushes that failed and were re-marked dirty.
    pub failed: usize,
    /// Ids left dirty because the cycle deadline expired.
    pub deferred: usize,
}

impl SyncStats {
    fn bump(&mut self, category: DirtyCategory) {
        match category {
            DirtyCategory::Positions => self.positions += 1,
            DirtyCategory::Inventories => self.inventories += 1,
            DirtyCategory::Equipment => self.equipment += 1,
            DirtyCategory::Skills => self.skills += 1,
        }
    }
}

/// Coordinates flushing across all managers.
pub struct BatchSyncCoordinator {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    player: Arc<PlayerStateManager>,
    inventory: Arc<InventoryManager>,
    equipment: Arc<EquipmentManager>,
    skills: Arc<SkillsManager>,
    ground_items: Arc<GroundItemManager>,
    /// Budget for one cycle; ids not reached stay dirty for the next one.
    cycle_deadline: Duration,
}

impl BatchSyncCoordinator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        player: Arc<PlayerStateManager>,
        inventory: Arc<InventoryManager>,
        equipment: Arc<EquipmentManager>,
        skills: Arc<SkillsManager>,
        ground_items: Arc<GroundItemManager>,
        cycle_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            player,
            inventory,
            equipment,
            skills,
            ground_items,
            cycle_deadline,
        }
    }

    /// One periodic sync cycle over everything currently dirty.
    pub async fn sync_all(&self) -> anyhow::Result<SyncStats> {
        let started = Instant::now();
        let mut stats = SyncStats::default();

        for category in DirtyCategory::ALL {
            let ids = self.drain_dirty(category).await?;
            for (index, player_id) in ids.iter().enumerate() {
                if started.elapsed() > self.cycle_deadline {
                    // Put the unprocessed remainder back for the next cycle.
                    for deferred in &ids[index..] {
                        self.mark_dirty(category, *deferred).await?;
                        stats.deferred += 1;
                    }
                    warn!(?category, deferred = stats.deferred, "sync cycle deadline hit");
                    break;
                }
                match self.flush_category(category, *player_id).await {
                    Ok(()) => stats.bump(category),
                    Err(err) => {
                        warn!(player_id, ?category, %err, "flush failed; re-marking dirty");
                        self.mark_dirty(category, *player_id).await?;
                        stats.failed += 1;
                    }
                }
            }
        }

        self.drain_ground_items(&mut stats).await?;

        metrics::counter!("batch_sync_cycles_total").increment(1);
        metrics::counter!("batch_sync_failures_total").increment(stats.failed as u64);
        debug!(?stats, "batch sync completed");
        Ok(stats)
    }

    /// Flushes every category for every online player, dirty or not, then
    /// the ground-item buffer. Used on shutdown; also the per-player
    /// disconnect path via [`sync_player`](Self::sync_player).
    pub async fn sync_all_on_shutdown(&self) -> anyhow::Result<SyncStats> {
        let mut stats = SyncStats::default();
        for player_id in self.player.online_player_ids().await? {
            for category in DirtyCategory::ALL {
                match self.flush_category(category, player_id).await {
                    Ok(()) => stats.bump(category),
                    Err(err) => {
                        warn!(player_id, ?category, %err, "shutdown flush failed");
                        self.mark_dirty(category, player_id).await?;
                        stats.failed += 1;
                    }
                }
            }
            // Flushed everything for this player; their dirty entries are
            // satisfied by the snapshots just written.
            for category in DirtyCategory::ALL {
                self.cache
                    .srem(category.key(), &player_id.to_string())
                    .await?;
            }
        }
        self.drain_ground_items(&mut stats).await?;
        Ok(stats)
    }

    /// Flushes all categories for one player (disconnect path).
    pub async fn sync_player(&self, player_id: i64) -> anyhow::Result<()> {
        for category in DirtyCategory::ALL {
            self.flush_category(category, player_id).await?;
            self.cache
                .srem(category.key(), &player_id.to_string())
                .await?;
        }
        Ok(())
    }

    async fn drain_dirty(&self, category: DirtyCategory) -> anyhow::Result<Vec<i64>> {
        let members = self.cache.smembers(category.key()).await?;
        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            self.cache.srem(category.key(), &member).await?;
            if let Ok(id) = member.parse() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    async fn mark_dirty(&self, category: DirtyCategory, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .sadd(category.key(), &player_id.to_string())
            .await?;
        Ok(())
    }

    async fn flush_category(
        &self,
        category: DirtyCategory,
        player_id: i64,
    ) -> anyhow::Result<()> {
        match category {
            DirtyCategory::Positions => {
                let Some(position) = self.player.get_position(player_id).await? else {
                    return Ok(()); // nothing cached, nothing to flush
                };
                let Some(hp) = self.player.get_hp(player_id).await? else {
                    return Ok(());
                };
                self.store
                    .save_player_state(&PlayerStateUpdate {
                        player_id,
                        map_id: position.map_id,
                        x: position.x,
                        y: position.y,
                        facing: position.facing,
                        current_hp: hp.current_hp,
                        max_hp: hp.max_hp,
                    })
                    .await
            }
            DirtyCategory::Inventories => {
                let rows = self.inventory.snapshot_rows(player_id).await?;
                self.store.replace_inventory(player_id, &rows).await
            }
            DirtyCategory::Equipment => {
                let rows = self.equipment.snapshot_rows(player_id).await?;
                self.store.replace_equipment(player_id, &rows).await
            }
            DirtyCategory::Skills => {
                let rows = self.skills.snapshot_rows(player_id).await?;
                self.store.upsert_skills(player_id, &rows).await
            }
        }
    }

    async fn drain_ground_items(&self, stats: &mut SyncStats) -> anyhow::Result<()> {
        let (upserts, deletes) = self.ground_items.pending_sync().await?;
        for item in upserts {
            match self.store.upsert_ground_item(&item.to_row()).await {
                Ok(()) => {
                    self.ground_items.ack_upsert(item.id).await?;
                    stats.ground_upserts += 1;
                }
                Err(err) => {
                    warn!(ground_id = item.id, %err, "ground item upsert failed");
                    stats.failed += 1;
                }
            }
        }
        for ground_id in deletes {
            match self.store.delete_ground_item(ground_id).await {
                Ok(()) => {
                    self.ground_items.ack_delete(ground_id).await?;
                    stats.ground_deletes += 1;
                }
                Err(err) => {
                    warn!(ground_id, %err, "ground item delete failed");
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tilefall_core::clock::{ClockSource, ManualClock};
    use tilefall_core::skills::SkillType;

    use super::super::reference::ReferenceData;
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::{
        EquipmentRow, GroundItemRow, InventoryRow, PlayerRow, SkillRow,
    };

    /// Store fake that records every write and can fail on demand.
    #[derive(Default)]
    struct RecordingStore {
        pub player_states: Mutex<Vec<PlayerStateUpdate>>,
        pub inventories: Mutex<Vec<(i64, Vec<InventoryRow>)>>,
        pub equipment: Mutex<Vec<(i64, Vec<EquipmentRow>)>>,
        pub skills: Mutex<Vec<(i64, Vec<SkillRow>)>>,
        pub ground_upserts: Mutex<Vec<GroundItemRow>>,
        pub ground_deletes: Mutex<Vec<i64>>,
        pub fail_inventory: AtomicBool,
    }

    #[async_trait]
    impl DurableStore for RecordingStore {
        async fn load_player(&self, _: i64) -> anyhow::Result<Option<PlayerRow>> {
            Ok(None)
        }
        async fn load_inventory(&self, _: i64) -> anyhow::Result<Vec<InventoryRow>> {
            Ok(Vec::new())
        }
        async fn load_equipment(&self, _: i64) -> anyhow::Result<Vec<EquipmentRow>> {
            Ok(Vec::new())
        }
        async fn load_skills(&self, _: i64) -> anyhow::Result<Vec<SkillRow>> {
            Ok(Vec::new())
        }
        async fn load_active_ground_items(&self, _: f64) -> anyhow::Result<Vec<GroundItemRow>> {
            Ok(Vec::new())
        }
        async fn save_player_state(&self, update: &PlayerStateUpdate) -> anyhow::Result<()> {
            self.player_states.lock().push(update.clone());
            Ok(())
        }
        async fn replace_inventory(
            &self,
            player_id: i64,
            rows: &[InventoryRow],
        ) -> anyhow::Result<()> {
            if self.fail_inventory.load(Ordering::SeqCst) {
                anyhow::bail!("injected inventory failure");
            }
            self.inventories.lock().push((player_id, rows.to_vec()));
            Ok(())
        }
        async fn replace_equipment(
            &self,
            player_id: i64,
            rows: &[EquipmentRow],
        ) -> anyhow::Result<()> {
            self.equipment.lock().push((player_id, rows.to_vec()));
            Ok(())
        }
        async fn upsert_skills(&self, player_id: i64, rows: &[SkillRow]) -> anyhow::Result<()> {
            self.skills.lock().push((player_id, rows.to_vec()));
            Ok(())
        }
        async fn upsert_ground_item(&self, row: &GroundItemRow) -> anyhow::Result<()> {
            self.ground_upserts.lock().push(row.clone());
            Ok(())
        }
        async fn delete_ground_item(&self, ground_id: i64) -> anyhow::Result<()> {
            self.ground_deletes.lock().push(ground_id);
            Ok(())
        }
    }

    struct Fixture {
        coordinator: BatchSyncCoordinator,
        cache: Arc<MemoryCache>,
        store: Arc<RecordingStore>,
        player: Arc<PlayerStateManager>,
        inventory: Arc<InventoryManager>,
        skills: Arc<SkillsManager>,
        ground: Arc<GroundItemManager>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let dyn_cache: Arc<dyn CacheEngine> = Arc::clone(&cache) as _;
        let store = Arc::new(RecordingStore::default());
        let dyn_store: Arc<dyn DurableStore> = Arc::clone(&store) as _;
        let clock: Arc<dyn ClockSource> = Arc::new(ManualClock::new(1000.0));
        let reference = Arc::new(ReferenceData::builtin());

        let player = Arc::new(PlayerStateManager::new(
            Arc::clone(&dyn_cache),
            Arc::clone(&dyn_store),
            Arc::clone(&clock),
        ));
        let inventory = Arc::new(InventoryManager::new(
            Arc::clone(&dyn_cache),
            Arc::clone(&dyn_store),
            Arc::clone(&reference),
        ));
        let equipment = Arc::new(EquipmentManager::new(
            Arc::clone(&dyn_cache),
            Arc::clone(&dyn_store),
            Arc::clone(&reference),
            Arc::clone(&inventory),
        ));
        let skills = Arc::new(SkillsManager::new(
            Arc::clone(&dyn_cache),
            Arc::clone(&dyn_store),
            Arc::clone(&reference),
        ));
        let ground = Arc::new(GroundItemManager::new(
            Arc::clone(&dyn_cache),
            Arc::clone(&dyn_store),
            Arc::clone(&clock),
            Arc::clone(&inventory),
            60.0,
            300.0,
        ));

        Fixture {
            coordinator: BatchSyncCoordinator::new(
                dyn_cache,
                dyn_store,
                Arc::clone(&player),
                Arc::clone(&inventory),
                equipment,
                Arc::clone(&skills),
                Arc::clone(&ground),
                Duration::from_secs(5),
            ),
            cache,
            store,
            player,
            inventory,
            skills,
            ground,
        }
    }

    #[tokio::test]
    async fn dirty_state_flushes_and_dirty_sets_empty() {
        let f = fixture();
        f.player
            .set_full_state(1, "samplemap", 10, 9, "up", 80, 100)
            .await
            .unwrap();
        f.inventory.add_item(1, 18, 3).await.unwrap();
        f.skills.grant_all(1).await.unwrap();

        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats.positions, 1);
        assert_eq!(stats.inventories, 1);
        assert_eq!(stats.skills, 1);
        assert_eq!(stats.failed, 0);

        let states = f.store.player_states.lock();
        assert_eq!(states.len(), 1);
        assert_eq!((states[0].x, states[0].y), (10, 9));
        assert_eq!(states[0].current_hp, 80);
        drop(states);

        let skills = f.store.skills.lock();
        assert_eq!(skills[0].1.len(), SkillType::ALL.len());
        drop(skills);

        for category in DirtyCategory::ALL {
            assert!(f.cache.smembers(category.key()).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn sync_with_no_dirty_state_is_a_no_op() {
        let f = fixture();
        f.player
            .set_full_state(1, "samplemap", 10, 10, "down", 100, 100)
            .await
            .unwrap();

        f.coordinator.sync_all().await.unwrap();
        let first_flushes = f.store.player_states.lock().len();

        // No intervening writes: the second cycle flushes nothing.
        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats, SyncStats::default());
        assert_eq!(f.store.player_states.lock().len(), first_flushes);
    }

    #[tokio::test]
    async fn failed_flush_re_marks_dirty_and_commits_the_rest() {
        let f = fixture();
        f.player
            .set_full_state(1, "samplemap", 10, 10, "down", 100, 100)
            .await
            .unwrap();
        f.inventory.add_item(1, 18, 1).await.unwrap();

        f.store.fail_inventory.store(true, Ordering::SeqCst);
        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats.positions, 1, "healthy categories still flush");
        assert_eq!(stats.failed, 1);
        assert!(f
            .cache
            .sismember(DirtyCategory::Inventories.key(), "1")
            .await
            .unwrap());

        // Backend recovers: the re-marked id drains on the next cycle.
        f.store.fail_inventory.store(false, Ordering::SeqCst);
        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats.inventories, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn ground_item_buffer_drains_upserts_and_deletes() {
        let f = fixture();
        let item = f
            .ground
            .create(18, "samplemap", 5, 5, 1, None, None)
            .await
            .unwrap();

        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats.ground_upserts, 1);
        assert_eq!(f.store.ground_upserts.lock()[0].id, item.id);

        // Pick it up: next cycle deletes it durably.
        f.ground.pick_up(7, item.id).await.unwrap();
        let stats = f.coordinator.sync_all().await.unwrap();
        assert_eq!(stats.ground_deletes, 1);
        assert_eq!(*f.store.ground_deletes.lock(), vec![item.id]);
    }

    #[tokio::test]
    async fn shutdown_drain_flushes_every_online_player() {
        let f = fixture();
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            f.player.register_online(id, name).await.unwrap();
            f.player
                .set_full_state(id, "samplemap", id as i32, 10, "down", 100, 100)
                .await
                .unwrap();
            f.skills.grant_all(id).await.unwrap();
        }
        // Even players whose dirty flags were already drained flush again.
        f.coordinator.sync_all().await.unwrap();
        let stats = f.coordinator.sync_all_on_shutdown().await.unwrap();
        assert_eq!(stats.positions, 3);
        assert_eq!(stats.skills, 3);
        assert_eq!(stats.failed, 0);

        let states = f.store.player_states.lock();
        let shutdown_writes = states.iter().filter(|s| s.map_id == "samplemap").count();
        assert!(shutdown_writes >= 6, "3 periodic + 3 shutdown flushes");
    }
}
