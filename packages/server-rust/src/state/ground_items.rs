//! Ground item manager: dropped items with privacy and despawn windows.
//!
//! Each item is a JSON record in the `ground_item:{id}` hash plus a
//! membership entry in its map's set. Creations and removals also feed the
//! pending-upsert/pending-delete sets that the batch sync coordinator
//! drains into the `ground_items` table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tilefall_core::clock::ClockSource;
use tilefall_core::messages::GroundItemView;

use crate::cache::{keys, CacheEngine};
use crate::db::{DurableStore, GroundItemRow};

use super::inventory::{InventoryManager, SlotRecord};

const F_DATA: &str = "data";

/// One item lying on the ground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundItem {
    pub id: i64,
    pub item_id: u32,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_durability: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dropped_by: Option<i64>,
    pub dropped_at: f64,
    pub public_at: f64,
    pub despawn_at: f64,
    /// Whether the end of the privacy window has been announced to the map.
    #[serde(default)]
    pub public_announced: bool,
}

impl GroundItem {
    /// Privacy rule: before `public_at` only the dropper sees the item.
    #[must_use]
    pub fn visible_to(&self, player_id: i64, now: f64) -> bool {
        now >= self.public_at || self.dropped_by == Some(player_id)
    }

    /// Whether the item is past its despawn time.
    #[must_use]
    pub fn expired(&self, now: f64) -> bool {
        now > self.despawn_at
    }

    /// Client view of this item.
    #[must_use]
    pub fn view(&self) -> GroundItemView {
        GroundItemView {
            id: self.id,
            item_id: self.item_id,
            map_id: self.map_id.clone(),
            x: self.x,
            y: self.y,
            quantity: self.quantity,
        }
    }

    /// Database row for this item.
    #[must_use]
    pub fn to_row(&self) -> GroundItemRow {
        GroundItemRow {
            id: self.id,
            item_id: i32::try_from(self.item_id).unwrap_or(i32::MAX),
            map_id: self.map_id.clone(),
            x: self.x,
            y: self.y,
            quantity: i32::try_from(self.quantity).unwrap_or(i32::MAX),
            current_durability: self
                .current_durability
                .map(|d| i32::try_from(d).unwrap_or(i32::MAX)),
            dropped_by: self.dropped_by,
            dropped_at: self.dropped_at,
            public_at: self.public_at,
            despawn_at: self.despawn_at,
        }
    }

    fn from_row(row: GroundItemRow) -> Self {
        Self {
            id: row.id,
            item_id: u32::try_from(row.item_id).unwrap_or(0),
            map_id: row.map_id,
            x: row.x,
            y: row.y,
            quantity: u32::try_from(row.quantity.max(1)).unwrap_or(1),
            current_durability: row.current_durability.and_then(|d| u32::try_from(d).ok()),
            dropped_by: row.dropped_by,
            dropped_at: row.dropped_at,
            public_at: row.public_at,
            despawn_at: row.despawn_at,
            public_announced: false,
        }
    }
}

/// Result of a pickup attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PickupOutcome {
    PickedUp(GroundItem),
    /// Unknown id, or the item already despawned.
    NotFound,
    /// Still inside another player's privacy window.
    NotYours,
    InventoryFull,
}

/// Façade over the cache for ground items.
pub struct GroundItemManager {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn ClockSource>,
    inventory: Arc<InventoryManager>,
    privacy_secs: f64,
    despawn_secs: f64,
}

impl GroundItemManager {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn ClockSource>,
        inventory: Arc<InventoryManager>,
        privacy_secs: f64,
        despawn_secs: f64,
    ) -> Self {
        Self {
            cache,
            store,
            clock,
            inventory,
            privacy_secs,
            despawn_secs,
        }
    }

    /// Drops an item on the ground.
    ///
    /// Player drops get a privacy window; system drops (entity loot,
    /// `dropped_by: None`) are public immediately.
    pub async fn create(
        &self,
        item_id: u32,
        map_id: &str,
        x: i32,
        y: i32,
        quantity: u32,
        current_durability: Option<u32>,
        dropped_by: Option<i64>,
    ) -> anyhow::Result<GroundItem> {
        let now = self.clock.now_secs();
        let id = self.cache.incr(keys::GROUND_ITEM_SEQ).await?;
        let item = GroundItem {
            id,
            item_id,
            map_id: map_id.to_string(),
            x,
            y,
            quantity: quantity.max(1),
            current_durability,
            dropped_by,
            dropped_at: now,
            public_at: if dropped_by.is_some() {
                now + self.privacy_secs
            } else {
                now
            },
            despawn_at: now + self.despawn_secs,
            public_announced: dropped_by.is_none(),
        };
        self.write(&item).await?;
        self.cache
            .sadd(&keys::ground_items_by_map(map_id), &id.to_string())
            .await?;
        self.cache
            .sadd(keys::GROUND_ITEMS_PENDING_UPSERT, &id.to_string())
            .await?;
        Ok(item)
    }

    /// Reads one ground item.
    pub async fn get(&self, ground_id: i64) -> anyhow::Result<Option<GroundItem>> {
        let raw = self.cache.hget(&keys::ground_item(ground_id), F_DATA).await?;
        Ok(raw.and_then(|v| serde_json::from_str(&v).ok()))
    }

    /// All items on a map, expired or not.
    pub async fn items_on_map(&self, map_id: &str) -> anyhow::Result<Vec<GroundItem>> {
        let ids = self.cache.smembers(&keys::ground_items_by_map(map_id)).await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(ground_id) = id.parse::<i64>() {
                if let Some(item) = self.get(ground_id).await? {
                    items.push(item);
                }
            }
        }
        items.sort_unstable_by_key(|i| i.id);
        Ok(items)
    }

    /// Items on a map that `player_id` may currently see.
    pub async fn visible_on_map(
        &self,
        map_id: &str,
        player_id: i64,
    ) -> anyhow::Result<Vec<GroundItem>> {
        let now = self.clock.now_secs();
        Ok(self
            .items_on_map(map_id)
            .await?
            .into_iter()
            .filter(|item| !item.expired(now) && item.visible_to(player_id, now))
            .collect())
    }

    /// Attempts to pick up a ground item into the player's inventory.
    pub async fn pick_up(
        &self,
        player_id: i64,
        ground_id: i64,
    ) -> anyhow::Result<PickupOutcome> {
        let now = self.clock.now_secs();
        let Some(item) = self.get(ground_id).await? else {
            return Ok(PickupOutcome::NotFound);
        };
        if item.expired(now) {
            self.remove(&item).await?;
            return Ok(PickupOutcome::NotFound);
        }
        if !item.visible_to(player_id, now) {
            return Ok(PickupOutcome::NotYours);
        }
        let added = self
            .inventory
            .add_record(
                player_id,
                SlotRecord {
                    item_id: item.item_id,
                    quantity: item.quantity,
                    current_durability: item.current_durability,
                },
            )
            .await?;
        if !added {
            return Ok(PickupOutcome::InventoryFull);
        }
        self.remove(&item).await?;
        Ok(PickupOutcome::PickedUp(item))
    }

    /// Items whose privacy window ended since the last call: flags each as
    /// announced and returns it, so the broadcaster can reveal it to the
    /// rest of the map exactly once.
    pub async fn sweep_newly_public(
        &self,
        map_ids: &[String],
    ) -> anyhow::Result<Vec<GroundItem>> {
        let now = self.clock.now_secs();
        let mut revealed = Vec::new();
        for map_id in map_ids {
            for mut item in self.items_on_map(map_id).await? {
                if item.public_announced || now < item.public_at || item.expired(now) {
                    continue;
                }
                item.public_announced = true;
                self.write(&item).await?;
                // Announced state matters only in cache; no dirty mark.
                if item.dropped_by.is_some() {
                    revealed.push(item);
                }
            }
        }
        Ok(revealed)
    }

    /// Removes every item past its despawn time, returning what was swept.
    pub async fn sweep_expired(&self, map_ids: &[String]) -> anyhow::Result<Vec<GroundItem>> {
        let now = self.clock.now_secs();
        let mut swept = Vec::new();
        for map_id in map_ids {
            for item in self.items_on_map(map_id).await? {
                if item.expired(now) {
                    self.remove(&item).await?;
                    swept.push(item);
                }
            }
        }
        Ok(swept)
    }

    /// Loads still-active ground items from the durable store (startup).
    pub async fn hydrate_from_store(&self) -> anyhow::Result<usize> {
        let now = self.clock.now_secs();
        let rows = self.store.load_active_ground_items(now).await?;
        let count = rows.len();
        let mut max_id = 0;
        for row in rows {
            let item = GroundItem::from_row(row);
            max_id = max_id.max(item.id);
            self.write(&item).await?;
            self.cache
                .sadd(&keys::ground_items_by_map(&item.map_id), &item.id.to_string())
                .await?;
        }
        // Keep the id sequence ahead of everything persisted.
        while self.cache.incr(keys::GROUND_ITEM_SEQ).await? < max_id {}
        Ok(count)
    }

    /// Snapshot of the pending write-through buffer:
    /// `(upsert records, deleted ids)`.
    pub async fn pending_sync(&self) -> anyhow::Result<(Vec<GroundItem>, Vec<i64>)> {
        let mut upserts = Vec::new();
        for id in self.cache.smembers(keys::GROUND_ITEMS_PENDING_UPSERT).await? {
            if let Ok(ground_id) = id.parse::<i64>() {
                if let Some(item) = self.get(ground_id).await? {
                    upserts.push(item);
                }
            }
        }
        let deletes = self
            .cache
            .smembers(keys::GROUND_ITEMS_PENDING_DELETE)
            .await?
            .into_iter()
            .filter_map(|id| id.parse().ok())
            .collect();
        Ok((upserts, deletes))
    }

    /// Acknowledges one flushed upsert.
    pub async fn ack_upsert(&self, ground_id: i64) -> anyhow::Result<()> {
        self.cache
            .srem(keys::GROUND_ITEMS_PENDING_UPSERT, &ground_id.to_string())
            .await?;
        Ok(())
    }

    /// Acknowledges one flushed delete.
    pub async fn ack_delete(&self, ground_id: i64) -> anyhow::Result<()> {
        self.cache
            .srem(keys::GROUND_ITEMS_PENDING_DELETE, &ground_id.to_string())
            .await?;
        Ok(())
    }

    async fn write(&self, item: &GroundItem) -> anyhow::Result<()> {
        self.cache
            .hset(
                &keys::ground_item(item.id),
                vec![(F_DATA.to_string(), serde_json::to_string(item)?)],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, item: &GroundItem) -> anyhow::Result<()> {
        let id_str = item.id.to_string();
        self.cache.del(&keys::ground_item(item.id)).await?;
        self.cache
            .srem(&keys::ground_items_by_map(&item.map_id), &id_str)
            .await?;
        // A delete supersedes any not-yet-flushed upsert.
        self.cache
            .srem(keys::GROUND_ITEMS_PENDING_UPSERT, &id_str)
            .await?;
        self.cache
            .sadd(keys::GROUND_ITEMS_PENDING_DELETE, &id_str)
            .await?;
        Ok(())
    }
}
