//! Cache key layout.
//!
//! All hot state lives under these keys. Managers own their prefixes; the
//! batch sync coordinator owns the dirty sets.

/// Hash: `id -> username` for every online player.
pub const ONLINE_PLAYERS: &str = "online_players";
/// Hash: `username -> id`, the reverse of [`ONLINE_PLAYERS`].
pub const ONLINE_USERNAMES: &str = "online_usernames";

/// Zset: spawn-point ids scored by their respawn due time.
pub const ENTITY_RESPAWN_QUEUE: &str = "entity_respawn_queue";

/// Counter: next entity instance id.
pub const ENTITY_INSTANCE_SEQ: &str = "entity_instance_seq";
/// Counter: next ground item id.
pub const GROUND_ITEM_SEQ: &str = "ground_item_seq";

/// Set: ground item ids created or mutated since the last sync cycle.
pub const GROUND_ITEMS_PENDING_UPSERT: &str = "ground_items:pending_upsert";
/// Set: ground item ids removed since the last sync cycle.
pub const GROUND_ITEMS_PENDING_DELETE: &str = "ground_items:pending_delete";

/// Dirty set for one sync category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyCategory {
    Positions,
    Inventories,
    Equipment,
    Skills,
}

impl DirtyCategory {
    pub const ALL: [DirtyCategory; 4] = [
        DirtyCategory::Positions,
        DirtyCategory::Inventories,
        DirtyCategory::Equipment,
        DirtyCategory::Skills,
    ];

    /// The cache set key holding the dirty player ids for this category.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            DirtyCategory::Positions => "dirty:positions",
            DirtyCategory::Inventories => "dirty:inventories",
            DirtyCategory::Equipment => "dirty:equipment",
            DirtyCategory::Skills => "dirty:skills",
        }
    }
}

/// Hash holding one player's position, HP, facing, and combat state.
#[must_use]
pub fn player(player_id: i64) -> String {
    format!("player:{player_id}")
}

/// Hash: inventory slot index -> JSON slot record.
#[must_use]
pub fn player_inventory(player_id: i64) -> String {
    format!("player:{player_id}:inventory")
}

/// Hash: equipment slot name -> JSON slot record.
#[must_use]
pub fn player_equipment(player_id: i64) -> String {
    format!("player:{player_id}:equipment")
}

/// Hash: skill name -> JSON skill record.
#[must_use]
pub fn player_skills(player_id: i64) -> String {
    format!("player:{player_id}:skills")
}

/// Hash holding one ground item record.
#[must_use]
pub fn ground_item(ground_id: i64) -> String {
    format!("ground_item:{ground_id}")
}

/// Set of ground item ids on one map.
#[must_use]
pub fn ground_items_by_map(map_id: &str) -> String {
    format!("ground_items:{map_id}")
}

/// Hash holding one entity instance record.
#[must_use]
pub fn entity_instance(instance_id: i64) -> String {
    format!("entity_instance:{instance_id}")
}

/// Set of entity instance ids on one map.
#[must_use]
pub fn entities_by_map(map_id: &str) -> String {
    format!("entities:{map_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_are_stable() {
        assert_eq!(player(7), "player:7");
        assert_eq!(player_inventory(7), "player:7:inventory");
        assert_eq!(player_equipment(7), "player:7:equipment");
        assert_eq!(player_skills(7), "player:7:skills");
        assert_eq!(ground_item(3), "ground_item:3");
        assert_eq!(ground_items_by_map("samplemap"), "ground_items:samplemap");
        assert_eq!(entity_instance(77), "entity_instance:77");
        assert_eq!(entities_by_map("samplemap"), "entities:samplemap");
    }

    #[test]
    fn dirty_categories_have_distinct_keys() {
        let keys: std::collections::HashSet<&str> =
            DirtyCategory::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), DirtyCategory::ALL.len());
    }
}
