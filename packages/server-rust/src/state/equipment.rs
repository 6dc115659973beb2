//! Equipment manager: one item per named slot.
//!
//! Equipped items live in the `player:{id}:equipment` hash, one field per
//! slot name. Equip and unequip move whole inventory stacks between the
//! inventory hash and the equipment hash; room is checked before anything
//! mutates so a failed operation changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tilefall_core::defs::{CombatBonuses, ItemDef};
use tilefall_core::types::EquipmentSlot;

use crate::cache::{keys, CacheEngine, DirtyCategory};
use crate::db::{DurableStore, EquipmentRow};

use super::inventory::{InventoryManager, SlotRecord};
use super::reference::ReferenceData;

const F_HYDRATED: &str = "_hydrated";

/// Result of an equip or unequip attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipOutcome {
    /// The operation applied.
    Done,
    /// The referenced inventory/equipment slot is empty.
    EmptySlot,
    /// The item has no equipment slot.
    NotEquippable,
    /// A displaced item (or the unequipped item) has no inventory room.
    InventoryFull,
    /// A shield cannot be equipped while a two-handed weapon is worn.
    TwoHandedConflict,
}

fn decode_equipment(map: &HashMap<String, String>) -> Vec<(EquipmentSlot, SlotRecord)> {
    let mut slots: Vec<(EquipmentSlot, SlotRecord)> = map
        .iter()
        .filter(|(field, _)| !field.starts_with('_'))
        .filter_map(|(field, value)| {
            let slot = field.parse().ok()?;
            let record = serde_json::from_str(value).ok()?;
            Some((slot, record))
        })
        .collect();
    slots.sort_unstable_by_key(|(slot, _)| slot.as_str());
    slots
}

fn encode_record(record: &SlotRecord) -> String {
    serde_json::to_string(record).unwrap_or_default()
}

/// Façade over the cache for `player:{id}:equipment`.
pub struct EquipmentManager {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    reference: Arc<ReferenceData>,
    inventory: Arc<InventoryManager>,
}

impl EquipmentManager {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        reference: Arc<ReferenceData>,
        inventory: Arc<InventoryManager>,
    ) -> Self {
        Self {
            cache,
            store,
            reference,
            inventory,
        }
    }

    /// Reads the equipment, hydrating from the durable store on a miss.
    pub async fn get_equipment(
        &self,
        player_id: i64,
    ) -> anyhow::Result<Vec<(EquipmentSlot, SlotRecord)>> {
        let key = keys::player_equipment(player_id);
        let map = self.cache.hgetall(&key).await?;
        if !map.is_empty() {
            return Ok(decode_equipment(&map));
        }
        self.hydrate(player_id).await?;
        let map = self.cache.hgetall(&key).await?;
        Ok(decode_equipment(&map))
    }

    /// Reads one equipment slot.
    pub async fn get_slot(
        &self,
        player_id: i64,
        slot: EquipmentSlot,
    ) -> anyhow::Result<Option<SlotRecord>> {
        Ok(self
            .get_equipment(player_id)
            .await?
            .into_iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, record)| record))
    }

    /// Equips the item in inventory slot `inv_slot`.
    ///
    /// Resolves the equipment slot from the item definition; a two-handed
    /// weapon displaces the shield; ammo of the same kind stacks into the
    /// quiver. Displaced items return to the inventory, and the whole
    /// operation is rejected up front if they would not fit.
    pub async fn equip(&self, player_id: i64, inv_slot: u32) -> anyhow::Result<EquipOutcome> {
        let Some(record) = self.inventory.get_slot(player_id, inv_slot).await? else {
            return Ok(EquipOutcome::EmptySlot);
        };
        let def = self
            .reference
            .item(record.item_id)
            .with_context(|| format!("unknown item {}", record.item_id))?;
        let Some(target_slot) = def.equipment_slot else {
            return Ok(EquipOutcome::NotEquippable);
        };

        let equipped = self.get_equipment(player_id).await?;
        let current: HashMap<EquipmentSlot, SlotRecord> = equipped.into_iter().collect();

        if target_slot == EquipmentSlot::Shield
            && current
                .get(&EquipmentSlot::Weapon)
                .and_then(|w| self.reference.item(w.item_id))
                .is_some_and(|w| w.two_handed)
        {
            return Ok(EquipOutcome::TwoHandedConflict);
        }

        // Quiver stacking: same ammo merges instead of displacing.
        let ammo_merge = target_slot == EquipmentSlot::Ammo
            && current
                .get(&EquipmentSlot::Ammo)
                .is_some_and(|a| a.item_id == record.item_id);

        let mut displaced: Vec<SlotRecord> = Vec::new();
        if !ammo_merge {
            if let Some(existing) = current.get(&target_slot) {
                displaced.push(*existing);
            }
        }
        if def.two_handed {
            if let Some(shield) = current.get(&EquipmentSlot::Shield) {
                displaced.push(*shield);
            }
        }

        // Room check before any mutation: the equipping item frees its own
        // slot, every displaced item needs one.
        let used = self.inventory.get_inventory(player_id).await?.len();
        let free_after_equip =
            usize::try_from(tilefall_core::constants::MAX_INVENTORY_SLOTS).unwrap_or(0) - used + 1;
        if displaced.len() > free_after_equip {
            return Ok(EquipOutcome::InventoryFull);
        }

        // Mutate: pull the stack out of the inventory first so a displaced
        // item can reuse the freed slot.
        self.mark_dirty(player_id).await?;
        let Some(moving) = self
            .inventory
            .remove_quantity(player_id, inv_slot, record.quantity)
            .await?
        else {
            return Ok(EquipOutcome::EmptySlot);
        };
        for item in &displaced {
            // Room was verified above; a failure here is an invariant bug.
            anyhow::ensure!(
                self.inventory.add_record(player_id, *item).await?,
                "displaced item no longer fits for player {player_id}"
            );
        }

        let max_stack = def.max_stack_size.max(1);
        let merged = if ammo_merge {
            let existing = current
                .get(&EquipmentSlot::Ammo)
                .copied()
                .unwrap_or(SlotRecord {
                    item_id: moving.item_id,
                    quantity: 0,
                    current_durability: None,
                });
            let space = max_stack.saturating_sub(existing.quantity);
            let take = moving.quantity.min(space);
            let remainder = moving.quantity - take;
            if remainder > 0 {
                // Quiver overflow goes back to the bag rather than vanishing.
                anyhow::ensure!(
                    self.inventory
                        .add_record(
                            player_id,
                            SlotRecord {
                                quantity: remainder,
                                ..moving
                            },
                        )
                        .await?,
                    "quiver overflow no longer fits for player {player_id}"
                );
            }
            SlotRecord {
                item_id: moving.item_id,
                quantity: existing.quantity + take,
                current_durability: None,
            }
        } else {
            moving
        };

        let fields = vec![
            (target_slot.as_str().to_string(), encode_record(&merged)),
            (F_HYDRATED.to_string(), "1".to_string()),
        ];
        if def.two_handed {
            self.cache
                .hdel(
                    &keys::player_equipment(player_id),
                    &[EquipmentSlot::Shield.as_str()],
                )
                .await?;
        }
        self.cache
            .hset(&keys::player_equipment(player_id), fields)
            .await?;
        Ok(EquipOutcome::Done)
    }

    /// Unequips the item in `slot` back into the inventory.
    pub async fn unequip(
        &self,
        player_id: i64,
        slot: EquipmentSlot,
    ) -> anyhow::Result<EquipOutcome> {
        let Some(record) = self.get_slot(player_id, slot).await? else {
            return Ok(EquipOutcome::EmptySlot);
        };
        self.mark_dirty(player_id).await?;
        if !self.inventory.add_record(player_id, record).await? {
            return Ok(EquipOutcome::InventoryFull);
        }
        self.cache
            .hdel(&keys::player_equipment(player_id), &[slot.as_str()])
            .await?;
        Ok(EquipOutcome::Done)
    }

    /// Sum of combat bonuses across all equipped items.
    pub async fn total_bonuses(&self, player_id: i64) -> anyhow::Result<CombatBonuses> {
        let mut total = CombatBonuses::default();
        for (_, record) in self.get_equipment(player_id).await? {
            if let Some(def) = self.reference.item(record.item_id) {
                total.attack += def.bonuses.attack;
                total.strength += def.bonuses.strength;
                total.ranged_attack += def.bonuses.ranged_attack;
                total.ranged_strength += def.bonuses.ranged_strength;
                total.magic_attack += def.bonuses.magic_attack;
                total.magic_damage += def.bonuses.magic_damage;
                total.physical_defence += def.bonuses.physical_defence;
                total.magic_defence += def.bonuses.magic_defence;
                total.health += def.bonuses.health;
                total.speed += def.bonuses.speed;
            }
        }
        Ok(total)
    }

    /// The equipped weapon's definition, if any.
    pub async fn weapon_def(&self, player_id: i64) -> anyhow::Result<Option<&ItemDef>> {
        let Some(record) = self.get_slot(player_id, EquipmentSlot::Weapon).await? else {
            return Ok(None);
        };
        Ok(self.reference.item(record.item_id))
    }

    /// Consumes `quantity` units of equipped ammo matching `ammo_type`.
    /// Returns the remaining quantity, or `None` when no matching ammo was
    /// equipped.
    pub async fn consume_ammo(
        &self,
        player_id: i64,
        ammo_type: &str,
        quantity: u32,
    ) -> anyhow::Result<Option<u32>> {
        // Hydrate + type check outside the atomic update.
        let Some(record) = self.get_slot(player_id, EquipmentSlot::Ammo).await? else {
            return Ok(None);
        };
        if self
            .reference
            .item(record.item_id)
            .and_then(|d| d.ammo_type.as_deref())
            != Some(ammo_type)
        {
            return Ok(None);
        }

        let cell = Arc::new(parking_lot::Mutex::new(None::<u32>));
        let out = Arc::clone(&cell);
        self.mark_dirty(player_id).await?;
        self.cache
            .update_hash(
                &keys::player_equipment(player_id),
                Box::new(move |map| {
                    let field = EquipmentSlot::Ammo.as_str();
                    let Some(mut record): Option<SlotRecord> =
                        map.get(field).and_then(|v| serde_json::from_str(v).ok())
                    else {
                        return false;
                    };
                    if record.quantity <= quantity {
                        map.remove(field);
                        *out.lock() = Some(0);
                    } else {
                        record.quantity -= quantity;
                        map.insert(field.to_string(), encode_record(&record));
                        *out.lock() = Some(record.quantity);
                    }
                    true
                }),
            )
            .await?;
        let remaining = *cell.lock();
        Ok(remaining)
    }

    /// Snapshot for the batch sync coordinator.
    pub async fn snapshot_rows(&self, player_id: i64) -> anyhow::Result<Vec<EquipmentRow>> {
        Ok(self
            .get_equipment(player_id)
            .await?
            .into_iter()
            .map(|(slot, record)| EquipmentRow {
                player_id,
                equipment_slot: slot.as_str().to_string(),
                item_id: i32::try_from(record.item_id).unwrap_or(i32::MAX),
                quantity: i32::try_from(record.quantity).unwrap_or(i32::MAX),
                current_durability: record
                    .current_durability
                    .map(|d| i32::try_from(d).unwrap_or(i32::MAX)),
            })
            .collect())
    }

    /// Drops the hot equipment from the cache (after logout sync).
    pub async fn clear(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache.del(&keys::player_equipment(player_id)).await?;
        Ok(())
    }

    async fn hydrate(&self, player_id: i64) -> anyhow::Result<()> {
        let rows = self.store.load_equipment(player_id).await?;
        let mut fields = vec![(F_HYDRATED.to_string(), "1".to_string())];
        for row in rows {
            let record = SlotRecord {
                item_id: u32::try_from(row.item_id).unwrap_or(0),
                quantity: u32::try_from(row.quantity.max(1)).unwrap_or(1),
                current_durability: row
                    .current_durability
                    .and_then(|d| u32::try_from(d).ok()),
            };
            fields.push((row.equipment_slot, encode_record(&record)));
        }
        self.cache
            .hset(&keys::player_equipment(player_id), fields)
            .await?;
        Ok(())
    }

    /// Marks the equipment category dirty. Called before the mutation it
    /// covers, so a cancelled task can leave a spurious flag but never an
    /// unflagged change.
    async fn mark_dirty(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .sadd(DirtyCategory::Equipment.key(), &player_id.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tilefall_core::constants::MAX_INVENTORY_SLOTS;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::NullStore;

    struct Fixture {
        equipment: EquipmentManager,
        inventory: Arc<InventoryManager>,
        reference: Arc<ReferenceData>,
    }

    fn fixture() -> Fixture {
        let cache: Arc<dyn CacheEngine> = Arc::new(MemoryCache::new());
        let store: Arc<dyn DurableStore> = Arc::new(NullStore);
        let reference = Arc::new(ReferenceData::builtin());
        let inventory = Arc::new(InventoryManager::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Arc::clone(&reference),
        ));
        Fixture {
            equipment: EquipmentManager::new(
                cache,
                store,
                Arc::clone(&reference),
                Arc::clone(&inventory),
            ),
            inventory,
            reference,
        }
    }

    fn id(f: &Fixture, name: &str) -> u32 {
        f.reference.item_by_name(name).unwrap().id
    }

    #[tokio::test]
    async fn equip_moves_item_to_resolved_slot() {
        let f = fixture();
        let sword = id(&f, "bronze_sword");
        f.inventory.add_item(1, sword, 1).await.unwrap();

        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);
        assert!(f.inventory.get_inventory(1).await.unwrap().is_empty());
        let weapon = f.equipment.get_slot(1, EquipmentSlot::Weapon).await.unwrap();
        assert_eq!(weapon.unwrap().item_id, sword);
    }

    #[tokio::test]
    async fn equip_displaces_previous_item_to_inventory() {
        let f = fixture();
        let bronze = id(&f, "bronze_sword");
        let iron = id(&f, "iron_sword");
        f.inventory.add_item(1, bronze, 1).await.unwrap();
        f.inventory.add_item(1, iron, 1).await.unwrap();

        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);
        assert_eq!(f.equipment.equip(1, 1).await.unwrap(), EquipOutcome::Done);

        let weapon = f.equipment.get_slot(1, EquipmentSlot::Weapon).await.unwrap();
        assert_eq!(weapon.unwrap().item_id, iron);
        let inv = f.inventory.get_inventory(1).await.unwrap();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv[0].1.item_id, bronze);
    }

    #[tokio::test]
    async fn two_hander_removes_shield_first() {
        let f = fixture();
        let shield = id(&f, "bronze_shield");
        let two_hander = id(&f, "bronze_2h_sword");
        f.inventory.add_item(1, shield, 1).await.unwrap();
        f.inventory.add_item(1, two_hander, 1).await.unwrap();

        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);
        assert_eq!(f.equipment.equip(1, 1).await.unwrap(), EquipOutcome::Done);

        assert!(f
            .equipment
            .get_slot(1, EquipmentSlot::Shield)
            .await
            .unwrap()
            .is_none());
        let inv = f.inventory.get_inventory(1).await.unwrap();
        assert_eq!(inv.len(), 1);
        assert_eq!(inv[0].1.item_id, shield);
    }

    #[tokio::test]
    async fn shield_rejected_while_two_hander_worn() {
        let f = fixture();
        let shield = id(&f, "bronze_shield");
        let two_hander = id(&f, "bronze_2h_sword");
        f.inventory.add_item(1, two_hander, 1).await.unwrap();
        f.inventory.add_item(1, shield, 1).await.unwrap();

        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);
        assert_eq!(
            f.equipment.equip(1, 1).await.unwrap(),
            EquipOutcome::TwoHandedConflict
        );
        // Shield stays in the inventory.
        assert_eq!(f.inventory.get_inventory(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ammo_stacks_into_quiver() {
        let f = fixture();
        let arrows = id(&f, "bronze_arrows");
        f.inventory.add_item(1, arrows, 100).await.unwrap();
        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);

        f.inventory.add_item(1, arrows, 50).await.unwrap();
        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);

        let quiver = f.equipment.get_slot(1, EquipmentSlot::Ammo).await.unwrap();
        assert_eq!(quiver.unwrap().quantity, 150);
        assert!(f.inventory.get_inventory(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn equip_rejects_non_equippable_and_empty_slots() {
        let f = fixture();
        let bread = id(&f, "bread");
        f.inventory.add_item(1, bread, 1).await.unwrap();
        assert_eq!(
            f.equipment.equip(1, 0).await.unwrap(),
            EquipOutcome::NotEquippable
        );
        assert_eq!(f.equipment.equip(1, 5).await.unwrap(), EquipOutcome::EmptySlot);
    }

    #[tokio::test]
    async fn unequip_requires_inventory_room() {
        let f = fixture();
        let sword = id(&f, "bronze_sword");
        let helmet = id(&f, "bronze_helmet");
        f.inventory.add_item(1, sword, 1).await.unwrap();
        assert_eq!(f.equipment.equip(1, 0).await.unwrap(), EquipOutcome::Done);

        // Helmets do not stack: one per slot fills the whole bag.
        f.inventory
            .add_item(1, helmet, MAX_INVENTORY_SLOTS)
            .await
            .unwrap();
        assert_eq!(
            f.equipment.unequip(1, EquipmentSlot::Weapon).await.unwrap(),
            EquipOutcome::InventoryFull
        );
        // Still equipped.
        assert!(f
            .equipment
            .get_slot(1, EquipmentSlot::Weapon)
            .await
            .unwrap()
            .is_some());

        f.inventory.delete_slot(1, 0).await.unwrap();
        assert_eq!(
            f.equipment.unequip(1, EquipmentSlot::Weapon).await.unwrap(),
            EquipOutcome::Done
        );
    }

    #[tokio::test]
    async fn unequip_preserves_durability() {
        let f = fixture();
        let sword = id(&f, "bronze_sword");
        f.inventory
            .set_slot(
                1,
                0,
                SlotRecord {
                    item_id: sword,
                    quantity: 1,
                    current_durability: Some(123),
                },
            )
            .await
            .unwrap();
        f.equipment.equip(1, 0).await.unwrap();
        f.equipment.unequip(1, EquipmentSlot::Weapon).await.unwrap();

        let record = f.inventory.get_slot(1, 0).await.unwrap().unwrap();
        assert_eq!(record.current_durability, Some(123));
    }

    #[tokio::test]
    async fn total_bonuses_sum_equipped_items() {
        let f = fixture();
        let sword = id(&f, "bronze_sword"); // attack 4, strength 3
        let helmet = id(&f, "bronze_helmet"); // phys def 3, magic atk -1
        f.inventory.add_item(1, sword, 1).await.unwrap();
        f.inventory.add_item(1, helmet, 1).await.unwrap();
        f.equipment.equip(1, 0).await.unwrap();
        f.equipment.equip(1, 1).await.unwrap();

        let bonuses = f.equipment.total_bonuses(1).await.unwrap();
        assert_eq!(bonuses.attack, 4);
        assert_eq!(bonuses.strength, 3);
        assert_eq!(bonuses.physical_defence, 3);
        assert_eq!(bonuses.magic_attack, -1);
    }

    #[tokio::test]
    async fn consume_ammo_decrements_and_empties() {
        let f = fixture();
        let arrows = id(&f, "bronze_arrows");
        f.inventory.add_item(1, arrows, 2).await.unwrap();
        f.equipment.equip(1, 0).await.unwrap();

        assert_eq!(
            f.equipment.consume_ammo(1, "arrows", 1).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            f.equipment.consume_ammo(1, "arrows", 1).await.unwrap(),
            Some(0)
        );
        assert_eq!(f.equipment.consume_ammo(1, "arrows", 1).await.unwrap(), None);
        assert_eq!(f.equipment.consume_ammo(1, "bolts", 1).await.unwrap(), None);
    }
}
