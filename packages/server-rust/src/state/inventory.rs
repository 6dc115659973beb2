//! Inventory manager: 28 sparse slots per player.
//!
//! Slots live in the `player:{id}:inventory` hash, one field per occupied
//! slot index, each value a JSON slot record. Multi-slot mutations (adding
//! with stacking, moving, sorting) run inside one scripted hash update so
//! observers only ever see a complete before or after state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tilefall_core::constants::MAX_INVENTORY_SLOTS;

use crate::cache::{keys, CacheEngine, DirtyCategory};
use crate::db::{DurableStore, InventoryRow};

use super::reference::ReferenceData;

/// Marker field proving the hash was hydrated from the durable store, so
/// an empty inventory is distinguishable from a cache miss.
const F_HYDRATED: &str = "_hydrated";

/// One occupied inventory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub item_id: u32,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_durability: Option<u32>,
}

fn decode_slots(map: &HashMap<String, String>) -> Vec<(u32, SlotRecord)> {
    let mut slots: Vec<(u32, SlotRecord)> = map
        .iter()
        .filter(|(field, _)| !field.starts_with('_'))
        .filter_map(|(field, value)| {
            let slot = field.parse().ok()?;
            let record = serde_json::from_str(value).ok()?;
            Some((slot, record))
        })
        .collect();
    slots.sort_unstable_by_key(|(slot, _)| *slot);
    slots
}

fn encode_slot(record: &SlotRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

fn lowest_free_slot(map: &HashMap<String, String>) -> Option<u32> {
    (0..MAX_INVENTORY_SLOTS).find(|slot| !map.contains_key(&slot.to_string()))
}

/// The stacking algorithm: top up existing stacks of the item in ascending
/// slot order, then open new stacks in the lowest free slots. Returns
/// `false` when the quantity does not fully fit (caller aborts the update).
fn insert_stacking(
    map: &mut HashMap<String, String>,
    item_id: u32,
    quantity: u32,
    max_stack: u32,
    new_stack_durability: Option<u32>,
) -> bool {
    let mut remaining = quantity;

    if max_stack > 1 {
        let mut occupied = decode_slots(map);
        for (slot, record) in &mut occupied {
            if remaining == 0 {
                break;
            }
            if record.item_id == item_id && record.quantity < max_stack {
                let take = remaining.min(max_stack - record.quantity);
                record.quantity += take;
                remaining -= take;
                map.insert(slot.to_string(), encode_slot(record));
            }
        }
    }

    while remaining > 0 {
        let Some(slot) = lowest_free_slot(map) else {
            return false;
        };
        let take = remaining.min(max_stack);
        map.insert(
            slot.to_string(),
            encode_slot(&SlotRecord {
                item_id,
                quantity: take,
                current_durability: new_stack_durability,
            }),
        );
        remaining -= take;
    }
    true
}

/// Façade over the cache for `player:{id}:inventory`.
pub struct InventoryManager {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    reference: Arc<ReferenceData>,
}

impl InventoryManager {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        reference: Arc<ReferenceData>,
    ) -> Self {
        Self {
            cache,
            store,
            reference,
        }
    }

    /// Reads the inventory, hydrating from the durable store on a miss.
    /// Returns `(slot, record)` pairs in ascending slot order.
    pub async fn get_inventory(&self, player_id: i64) -> anyhow::Result<Vec<(u32, SlotRecord)>> {
        let key = keys::player_inventory(player_id);
        let map = self.cache.hgetall(&key).await?;
        if !map.is_empty() {
            return Ok(decode_slots(&map));
        }
        self.hydrate(player_id).await?;
        let map = self.cache.hgetall(&key).await?;
        Ok(decode_slots(&map))
    }

    /// Reads one slot, hydrating on a miss. `None` when the slot is empty.
    pub async fn get_slot(
        &self,
        player_id: i64,
        slot: u32,
    ) -> anyhow::Result<Option<SlotRecord>> {
        Ok(self
            .get_inventory(player_id)
            .await?
            .into_iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, record)| record))
    }

    /// Writes one slot directly. Rejects out-of-range slots.
    pub async fn set_slot(
        &self,
        player_id: i64,
        slot: u32,
        record: SlotRecord,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(slot < MAX_INVENTORY_SLOTS, "slot {slot} out of range");
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        self.cache
            .hset(
                &keys::player_inventory(player_id),
                vec![
                    (slot.to_string(), encode_slot(&record)),
                    (F_HYDRATED.to_string(), "1".to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Removes one slot. Removing an empty slot is a no-op.
    pub async fn delete_slot(&self, player_id: i64, slot: u32) -> anyhow::Result<()> {
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        self.cache
            .hdel(&keys::player_inventory(player_id), &[slot.to_string().as_str()])
            .await?;
        Ok(())
    }

    /// Adds `quantity` of an item, filling existing stacks of the same item
    /// in ascending slot order until saturated, then allocating the lowest
    /// free slot per remaining stack.
    ///
    /// Returns `false` (and changes nothing) when the items do not all fit.
    pub async fn add_item(
        &self,
        player_id: i64,
        item_id: u32,
        quantity: u32,
    ) -> anyhow::Result<bool> {
        if quantity == 0 {
            return Ok(true);
        }
        let def = self
            .reference
            .item(item_id)
            .with_context(|| format!("unknown item {item_id}"))?;
        let max_stack = def.max_stack_size.max(1);
        let fresh_durability = def.max_durability;

        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let applied = self
            .cache
            .update_hash(
                &keys::player_inventory(player_id),
                Box::new(move |map| {
                    insert_stacking(map, item_id, quantity, max_stack, fresh_durability)
                }),
            )
            .await?;
        Ok(applied)
    }

    /// Places an existing slot record back into the inventory (unequip and
    /// death-drop restore paths), preserving its durability. Stacking rules
    /// match [`add_item`](Self::add_item). Returns `false` when it does not
    /// fit.
    pub async fn add_record(&self, player_id: i64, record: SlotRecord) -> anyhow::Result<bool> {
        if record.quantity == 0 {
            return Ok(true);
        }
        let max_stack = self
            .reference
            .item(record.item_id)
            .map_or(1, |d| d.max_stack_size.max(1));
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let applied = self
            .cache
            .update_hash(
                &keys::player_inventory(player_id),
                Box::new(move |map| {
                    insert_stacking(
                        map,
                        record.item_id,
                        record.quantity,
                        max_stack,
                        record.current_durability,
                    )
                }),
            )
            .await?;
        Ok(applied)
    }

    /// Moves a slot's contents to another slot: merges same-item stacks up
    /// to the stack cap, otherwise swaps. Returns `false` when `from_slot`
    /// is empty or a slot index is out of range.
    pub async fn move_item(
        &self,
        player_id: i64,
        from_slot: u32,
        to_slot: u32,
    ) -> anyhow::Result<bool> {
        if from_slot >= MAX_INVENTORY_SLOTS || to_slot >= MAX_INVENTORY_SLOTS {
            return Ok(false);
        }
        if from_slot == to_slot {
            return Ok(true);
        }
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let reference = Arc::clone(&self.reference);
        let applied = self
            .cache
            .update_hash(
                &keys::player_inventory(player_id),
                Box::new(move |map| {
                    let from_field = from_slot.to_string();
                    let to_field = to_slot.to_string();
                    let Some(mut from): Option<SlotRecord> = map
                        .get(&from_field)
                        .and_then(|v| serde_json::from_str(v).ok())
                    else {
                        return false;
                    };
                    let to: Option<SlotRecord> =
                        map.get(&to_field).and_then(|v| serde_json::from_str(v).ok());

                    match to {
                        Some(mut to_rec)
                            if to_rec.item_id == from.item_id
                                && reference
                                    .item(from.item_id)
                                    .is_some_and(|d| d.max_stack_size > 1) =>
                        {
                            let max_stack = reference
                                .item(from.item_id)
                                .map_or(1, |d| d.max_stack_size.max(1));
                            let take = from.quantity.min(max_stack - to_rec.quantity.min(max_stack));
                            to_rec.quantity += take;
                            from.quantity -= take;
                            map.insert(to_field, encode_slot(&to_rec));
                            if from.quantity == 0 {
                                map.remove(&from_field);
                            } else {
                                map.insert(from_field, encode_slot(&from));
                            }
                        }
                        Some(to_rec) => {
                            map.insert(to_field, encode_slot(&from));
                            map.insert(from_field, encode_slot(&to_rec));
                        }
                        None => {
                            map.insert(to_field, encode_slot(&from));
                            map.remove(&from_field);
                        }
                    }
                    true
                }),
            )
            .await?;
        Ok(applied)
    }

    /// Removes up to `quantity` from a slot, returning what was removed.
    /// `None` when the slot is empty.
    pub async fn remove_quantity(
        &self,
        player_id: i64,
        slot: u32,
        quantity: u32,
    ) -> anyhow::Result<Option<SlotRecord>> {
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let cell = Arc::new(parking_lot::Mutex::new(None::<SlotRecord>));
        let out = Arc::clone(&cell);
        self.cache
            .update_hash(
                &keys::player_inventory(player_id),
                Box::new(move |map| {
                    let field = slot.to_string();
                    let Some(mut record): Option<SlotRecord> =
                        map.get(&field).and_then(|v| serde_json::from_str(v).ok())
                    else {
                        return false;
                    };
                    let take = record.quantity.min(quantity.max(1));
                    let removed = SlotRecord {
                        item_id: record.item_id,
                        quantity: take,
                        current_durability: record.current_durability,
                    };
                    record.quantity -= take;
                    if record.quantity == 0 {
                        map.remove(&field);
                    } else {
                        map.insert(field, encode_slot(&record));
                    }
                    *out.lock() = Some(removed);
                    true
                }),
            )
            .await?;
        let removed = cell.lock().take();
        Ok(removed)
    }

    /// Normalizes the inventory: stacks of the same item are merged
    /// (earlier stacks absorb later ones up to the cap), then slots are
    /// reassigned densely ordered by item category, item id, and
    /// descending quantity.
    pub async fn sort_inventory(&self, player_id: i64) -> anyhow::Result<()> {
        self.ensure_hydrated(player_id).await?;
        self.mark_dirty(player_id).await?;
        let reference = Arc::clone(&self.reference);
        self.cache
            .update_hash(
                &keys::player_inventory(player_id),
                Box::new(move |map| {
                    let slots = decode_slots(map);

                    // Merge stacks per item in slot order.
                    let mut merged: Vec<SlotRecord> = Vec::new();
                    for (_, record) in slots {
                        let max_stack = reference
                            .item(record.item_id)
                            .map_or(1, |d| d.max_stack_size.max(1));
                        let mut remaining = record.quantity;
                        if max_stack > 1 {
                            for existing in merged
                                .iter_mut()
                                .filter(|r| r.item_id == record.item_id)
                            {
                                if remaining == 0 {
                                    break;
                                }
                                let take = remaining.min(max_stack - existing.quantity);
                                existing.quantity += take;
                                remaining -= take;
                            }
                        }
                        if remaining > 0 {
                            merged.push(SlotRecord {
                                quantity: remaining,
                                ..record
                            });
                        }
                    }

                    merged.sort_by_key(|r| {
                        let category = reference.item(r.item_id).map(|d| d.category);
                        (category, r.item_id, std::cmp::Reverse(r.quantity))
                    });

                    map.retain(|field, _| field.starts_with('_'));
                    for (slot, record) in merged.iter().enumerate() {
                        map.insert(slot.to_string(), encode_slot(record));
                    }
                    true
                }),
            )
            .await?;
        Ok(())
    }

    /// Snapshot for the batch sync coordinator.
    pub async fn snapshot_rows(&self, player_id: i64) -> anyhow::Result<Vec<InventoryRow>> {
        Ok(self
            .get_inventory(player_id)
            .await?
            .into_iter()
            .map(|(slot, record)| InventoryRow {
                player_id,
                slot: i32::try_from(slot).unwrap_or(i32::MAX),
                item_id: i32::try_from(record.item_id).unwrap_or(i32::MAX),
                quantity: i32::try_from(record.quantity).unwrap_or(i32::MAX),
                current_durability: record
                    .current_durability
                    .map(|d| i32::try_from(d).unwrap_or(i32::MAX)),
            })
            .collect())
    }

    /// Drops the hot inventory from the cache (after logout sync).
    pub async fn clear(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache.del(&keys::player_inventory(player_id)).await?;
        Ok(())
    }

    async fn ensure_hydrated(&self, player_id: i64) -> anyhow::Result<()> {
        let key = keys::player_inventory(player_id);
        if self.cache.exists(&key).await? {
            return Ok(());
        }
        self.hydrate(player_id).await
    }

    async fn hydrate(&self, player_id: i64) -> anyhow::Result<()> {
        let rows = self.store.load_inventory(player_id).await?;
        let mut fields = vec![(F_HYDRATED.to_string(), "1".to_string())];
        for row in rows {
            let record = SlotRecord {
                item_id: u32::try_from(row.item_id).unwrap_or(0),
                quantity: u32::try_from(row.quantity.max(1)).unwrap_or(1),
                current_durability: row
                    .current_durability
                    .and_then(|d| u32::try_from(d).ok()),
            };
            fields.push((row.slot.to_string(), encode_slot(&record)));
        }
        self.cache
            .hset(&keys::player_inventory(player_id), fields)
            .await?;
        Ok(())
    }

    /// Marks the inventory category dirty. Called before the mutation it
    /// covers, so a cancelled task can leave a spurious flag but never an
    /// unflagged change.
    async fn mark_dirty(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .sadd(DirtyCategory::Inventories.key(), &player_id.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::NullStore;

    fn manager() -> (InventoryManager, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let mgr = InventoryManager::new(
            Arc::clone(&cache) as Arc<dyn CacheEngine>,
            Arc::new(NullStore),
            Arc::new(ReferenceData::builtin()),
        );
        (mgr, cache)
    }

    fn item_id(mgr: &InventoryManager, name: &str) -> u32 {
        mgr.reference.item_by_name(name).unwrap().id
    }

    #[tokio::test]
    async fn add_fills_existing_stacks_before_new_slots() {
        let (mgr, _) = manager();
        let logs = item_id(&mgr, "oak_logs"); // stack cap 64

        assert!(mgr.add_item(1, logs, 60).await.unwrap());
        assert!(mgr.add_item(1, logs, 10).await.unwrap());

        let slots = mgr.get_inventory(1).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].1.quantity, 64, "first stack saturates");
        assert_eq!(slots[1].1.quantity, 6, "overflow starts a new stack");
    }

    #[tokio::test]
    async fn add_unstackable_items_takes_one_slot_each() {
        let (mgr, _) = manager();
        let sword = item_id(&mgr, "bronze_sword");

        assert!(mgr.add_item(1, sword, 2).await.unwrap());
        let slots = mgr.get_inventory(1).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|(_, r)| r.quantity == 1));
        // Fresh durability comes from the definition.
        assert_eq!(slots[0].1.current_durability, Some(500));
    }

    #[tokio::test]
    async fn add_uses_lowest_free_slot() {
        let (mgr, _) = manager();
        let sword = item_id(&mgr, "bronze_sword");
        let bread = item_id(&mgr, "bread");

        assert!(mgr.add_item(1, sword, 3).await.unwrap()); // slots 0,1,2
        mgr.delete_slot(1, 1).await.unwrap();
        assert!(mgr.add_item(1, bread, 1).await.unwrap());

        let slots = mgr.get_inventory(1).await.unwrap();
        let bread_slot = slots.iter().find(|(_, r)| r.item_id == bread).unwrap().0;
        assert_eq!(bread_slot, 1, "hole is refilled first");
    }

    #[tokio::test]
    async fn inventory_full_aborts_without_partial_add() {
        let (mgr, _) = manager();
        let sword = item_id(&mgr, "bronze_sword");

        assert!(mgr.add_item(1, sword, MAX_INVENTORY_SLOTS).await.unwrap());
        // 2 more swords do not fit; nothing may change.
        assert!(!mgr.add_item(1, sword, 2).await.unwrap());
        let slots = mgr.get_inventory(1).await.unwrap();
        assert_eq!(slots.len(), MAX_INVENTORY_SLOTS as usize);
    }

    #[tokio::test]
    async fn overflow_of_a_stack_into_full_inventory_aborts() {
        let (mgr, _) = manager();
        let sword = item_id(&mgr, "bronze_sword");
        let logs = item_id(&mgr, "oak_logs");

        assert!(mgr.add_item(1, sword, MAX_INVENTORY_SLOTS - 1).await.unwrap());
        assert!(mgr.add_item(1, logs, 64).await.unwrap()); // last slot, saturated
        // 1 more log needs a new slot that does not exist; the partial
        // stack top-up must roll back too.
        assert!(!mgr.add_item(1, logs, 1).await.unwrap());
        let slots = mgr.get_inventory(1).await.unwrap();
        let log_stack = slots.iter().find(|(_, r)| r.item_id == logs).unwrap();
        assert_eq!(log_stack.1.quantity, 64);
    }

    #[tokio::test]
    async fn move_swaps_different_items() {
        let (mgr, _) = manager();
        let sword = item_id(&mgr, "bronze_sword");
        let bread = item_id(&mgr, "bread");
        mgr.add_item(1, sword, 1).await.unwrap();
        mgr.add_item(1, bread, 1).await.unwrap();

        assert!(mgr.move_item(1, 0, 1).await.unwrap());
        let slots = mgr.get_inventory(1).await.unwrap();
        assert_eq!(slots[0].1.item_id, bread);
        assert_eq!(slots[1].1.item_id, sword);
    }

    #[tokio::test]
    async fn move_merges_same_item_stacks() {
        let (mgr, _) = manager();
        let logs = item_id(&mgr, "oak_logs");
        mgr.set_slot(1, 0, SlotRecord { item_id: logs, quantity: 40, current_durability: None })
            .await
            .unwrap();
        mgr.set_slot(1, 5, SlotRecord { item_id: logs, quantity: 40, current_durability: None })
            .await
            .unwrap();

        assert!(mgr.move_item(1, 0, 5).await.unwrap());
        let slots = mgr.get_inventory(1).await.unwrap();
        assert_eq!(slots.len(), 2);
        let by_slot: HashMap<u32, u32> =
            slots.iter().map(|(s, r)| (*s, r.quantity)).collect();
        assert_eq!(by_slot[&5], 64, "destination saturates");
        assert_eq!(by_slot[&0], 16, "remainder stays behind");
    }

    #[tokio::test]
    async fn move_from_empty_slot_fails() {
        let (mgr, _) = manager();
        assert!(!mgr.move_item(1, 3, 4).await.unwrap());
        assert!(!mgr.move_item(1, 0, MAX_INVENTORY_SLOTS).await.unwrap());
    }

    #[tokio::test]
    async fn remove_quantity_splits_stacks() {
        let (mgr, _) = manager();
        let logs = item_id(&mgr, "oak_logs");
        mgr.add_item(1, logs, 30).await.unwrap();

        let removed = mgr.remove_quantity(1, 0, 10).await.unwrap().unwrap();
        assert_eq!(removed.quantity, 10);
        assert_eq!(mgr.get_inventory(1).await.unwrap()[0].1.quantity, 20);

        // Removing more than present drains the slot.
        let removed = mgr.remove_quantity(1, 0, 99).await.unwrap().unwrap();
        assert_eq!(removed.quantity, 20);
        assert!(mgr.get_inventory(1).await.unwrap().is_empty());

        assert!(mgr.remove_quantity(1, 0, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sort_merges_and_orders_by_category_then_item() {
        let (mgr, _) = manager();
        let logs = item_id(&mgr, "oak_logs");
        let sword = item_id(&mgr, "bronze_sword");
        let bread = item_id(&mgr, "bread");

        mgr.set_slot(1, 9, SlotRecord { item_id: logs, quantity: 40, current_durability: None })
            .await
            .unwrap();
        mgr.set_slot(1, 3, SlotRecord { item_id: bread, quantity: 2, current_durability: None })
            .await
            .unwrap();
        mgr.set_slot(1, 20, SlotRecord { item_id: logs, quantity: 40, current_durability: None })
            .await
            .unwrap();
        mgr.set_slot(1, 15, SlotRecord { item_id: sword, quantity: 1, current_durability: Some(400) })
            .await
            .unwrap();

        mgr.sort_inventory(1).await.unwrap();
        let slots = mgr.get_inventory(1).await.unwrap();

        // Dense slots from 0, weapon < material < consumable, logs merged
        // into 64 + 16.
        let layout: Vec<(u32, u32, u32)> = slots
            .iter()
            .map(|(s, r)| (*s, r.item_id, r.quantity))
            .collect();
        assert_eq!(
            layout,
            vec![(0, sword, 1), (1, logs, 64), (2, logs, 16), (3, bread, 2)]
        );
    }

    #[tokio::test]
    async fn mutations_mark_dirty() {
        let (mgr, cache) = manager();
        let bread = item_id(&mgr, "bread");
        mgr.add_item(9, bread, 1).await.unwrap();
        assert!(cache
            .sismember(DirtyCategory::Inventories.key(), "9")
            .await
            .unwrap());
    }

    proptest::proptest! {
        /// Whatever sequence of adds succeeds, the invariants hold: slot
        /// indices unique and in range, every stack within its cap, and
        /// the total quantity equal to everything accepted.
        #[test]
        fn stacking_invariants_hold(adds in proptest::collection::vec(1u32..200, 1..12)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (mgr, _) = manager();
                let logs = item_id(&mgr, "oak_logs"); // stack cap 64
                let mut accepted: u64 = 0;
                for quantity in adds {
                    if mgr.add_item(1, logs, quantity).await.unwrap() {
                        accepted += u64::from(quantity);
                    }
                }

                let slots = mgr.get_inventory(1).await.unwrap();
                let mut seen = std::collections::HashSet::new();
                let mut total: u64 = 0;
                for (slot, record) in slots {
                    assert!(slot < MAX_INVENTORY_SLOTS);
                    assert!(seen.insert(slot), "duplicate slot index");
                    assert!(record.quantity >= 1 && record.quantity <= 64);
                    total += u64::from(record.quantity);
                }
                assert_eq!(total, accepted, "no quantity created or lost");
            });
        }
    }
}
