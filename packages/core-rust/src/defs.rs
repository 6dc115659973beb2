//! Immutable reference-data records: item, skill, and entity definitions.
//!
//! Definitions are loaded once at startup and never mutated. The built-in
//! catalog below mirrors the rows the database migrations seed, so a server
//! without a populated `items` table still has a playable world and tests
//! never need a database.

use serde::{Deserialize, Serialize};

use crate::constants::{
    STACK_SIZE_AMMUNITION, STACK_SIZE_CONSUMABLES, STACK_SIZE_CURRENCY, STACK_SIZE_MATERIALS,
    STACK_SIZE_SINGLE,
};
use crate::skills::SkillType;
use crate::types::{EntityBehavior, EquipmentSlot};

/// Broad item classification, driving stack sizes and UI grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Weapon,
    Armor,
    Tool,
    Material,
    Consumable,
    Ammunition,
    Currency,
}

/// Equipment-relevant combat bonuses on an item definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatBonuses {
    pub attack: i32,
    pub strength: i32,
    pub ranged_attack: i32,
    pub ranged_strength: i32,
    pub magic_attack: i32,
    pub magic_damage: i32,
    pub physical_defence: i32,
    pub magic_defence: i32,
    pub health: i32,
    pub speed: i32,
}

/// One item definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: u32,
    /// Stable snake_case identifier (unique).
    pub name: String,
    pub display_name: String,
    pub category: ItemCategory,
    /// Slot this item equips into; `None` for non-equipable items.
    pub equipment_slot: Option<EquipmentSlot>,
    pub max_stack_size: u32,
    /// Two-handed weapons occupy the weapon slot and forbid a shield.
    pub two_handed: bool,
    /// `None` for items without durability (stackables).
    pub max_durability: Option<u32>,
    /// Indestructible items survive the owner's death.
    pub indestructible: bool,
    pub tradeable: bool,
    pub required_skill: Option<SkillType>,
    pub required_level: u32,
    /// For ranged weapons: the ammo family they fire. For ammunition:
    /// the family they belong to.
    pub ammo_type: Option<String>,
    /// Attack reach in tiles (Chebyshev). 1 for melee.
    pub attack_range: i32,
    pub value: u32,
    pub bonuses: CombatBonuses,
}

impl ItemDef {
    /// Whether stacks of this item can hold more than one unit.
    #[must_use]
    pub fn is_stackable(&self) -> bool {
        self.max_stack_size > 1
    }
}

/// One skill definition: the name plus its XP-curve multiplier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SkillDef {
    pub skill: SkillType,
    /// Scales the XP thresholds; `> 1.0` levels slower.
    pub xp_multiplier: f64,
}

/// Classification of an entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Monster,
    HumanoidNpc,
}

/// One entity (monster/NPC) definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub id: u32,
    /// Stable SCREAMING_CASE identifier (unique), e.g. `GOBLIN`.
    pub name: String,
    pub display_name: String,
    pub kind: EntityKind,
    pub behavior: EntityBehavior,
    pub is_attackable: bool,
    pub level: u32,
    pub max_hp: i32,
    /// Flat XP bonus granted to the killer on top of damage XP.
    pub xp_reward: u32,
    /// Tiles within which an aggressive entity acquires a target.
    pub aggro_radius: i32,
    /// Tiles from spawn beyond which the entity drops its target.
    pub disengage_radius: i32,
    pub respawn_time_secs: u32,
    pub attack_bonus: i32,
    pub strength_bonus: i32,
    pub defence_bonus: i32,
    /// Attack reach in tiles (Chebyshev).
    pub attack_range: i32,
    /// Seconds between entity attacks.
    pub attack_speed_secs: f64,
    /// Item name dropped on death, with quantity, if any.
    pub drop_table: Vec<(String, u32)>,
}

fn item(
    id: u32,
    name: &str,
    display_name: &str,
    category: ItemCategory,
    slot: Option<EquipmentSlot>,
    max_stack_size: u32,
    value: u32,
) -> ItemDef {
    ItemDef {
        id,
        name: name.to_string(),
        display_name: display_name.to_string(),
        category,
        equipment_slot: slot,
        max_stack_size,
        two_handed: false,
        max_durability: None,
        indestructible: false,
        tradeable: true,
        required_skill: None,
        required_level: 1,
        ammo_type: None,
        attack_range: 1,
        value,
        bonuses: CombatBonuses::default(),
    }
}

/// The built-in item catalog.
///
/// Ids are stable; the database seed uses the same rows.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn builtin_items() -> Vec<ItemDef> {
    vec![
        // Melee weapons
        ItemDef {
            max_durability: Some(500),
            required_skill: Some(SkillType::Attack),
            bonuses: CombatBonuses {
                attack: 4,
                strength: 3,
                ..CombatBonuses::default()
            },
            ..item(
                1,
                "bronze_sword",
                "Bronze Sword",
                ItemCategory::Weapon,
                Some(EquipmentSlot::Weapon),
                STACK_SIZE_SINGLE,
                20,
            )
        },
        ItemDef {
            max_durability: Some(750),
            required_skill: Some(SkillType::Attack),
            required_level: 10,
            bonuses: CombatBonuses {
                attack: 10,
                strength: 7,
                ..CombatBonuses::default()
            },
            ..item(
                2,
                "iron_sword",
                "Iron Sword",
                ItemCategory::Weapon,
                Some(EquipmentSlot::Weapon),
                STACK_SIZE_SINGLE,
                50,
            )
        },
        ItemDef {
            two_handed: true,
            max_durability: Some(600),
            required_skill: Some(SkillType::Attack),
            bonuses: CombatBonuses {
                attack: 6,
                strength: 8,
                ..CombatBonuses::default()
            },
            ..item(
                3,
                "bronze_2h_sword",
                "Bronze Two-Handed Sword",
                ItemCategory::Weapon,
                Some(EquipmentSlot::Weapon),
                STACK_SIZE_SINGLE,
                30,
            )
        },
        // Ranged weapons
        ItemDef {
            two_handed: true,
            max_durability: Some(500),
            required_skill: Some(SkillType::Attack),
            ammo_type: Some("arrows".to_string()),
            attack_range: 8,
            bonuses: CombatBonuses {
                ranged_attack: 4,
                ranged_strength: 3,
                ..CombatBonuses::default()
            },
            ..item(
                4,
                "shortbow",
                "Shortbow",
                ItemCategory::Weapon,
                Some(EquipmentSlot::Weapon),
                STACK_SIZE_SINGLE,
                25,
            )
        },
        // Bronze armor (heavy, small magic penalty)
        ItemDef {
            max_durability: Some(400),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -1,
                physical_defence: 3,
                magic_defence: 1,
                ..CombatBonuses::default()
            },
            ..item(
                5,
                "bronze_helmet",
                "Bronze Helmet",
                ItemCategory::Armor,
                Some(EquipmentSlot::Head),
                STACK_SIZE_SINGLE,
                15,
            )
        },
        ItemDef {
            max_durability: Some(600),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -3,
                physical_defence: 8,
                magic_defence: 2,
                health: 5,
                speed: -1,
                ..CombatBonuses::default()
            },
            ..item(
                6,
                "bronze_platebody",
                "Bronze Platebody",
                ItemCategory::Armor,
                Some(EquipmentSlot::Body),
                STACK_SIZE_SINGLE,
                40,
            )
        },
        ItemDef {
            max_durability: Some(500),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -2,
                physical_defence: 5,
                magic_defence: 1,
                ..CombatBonuses::default()
            },
            ..item(
                7,
                "bronze_platelegs",
                "Bronze Platelegs",
                ItemCategory::Armor,
                Some(EquipmentSlot::Legs),
                STACK_SIZE_SINGLE,
                30,
            )
        },
        ItemDef {
            max_durability: Some(300),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -1,
                physical_defence: 1,
                ..CombatBonuses::default()
            },
            ..item(
                8,
                "bronze_boots",
                "Bronze Boots",
                ItemCategory::Armor,
                Some(EquipmentSlot::Boots),
                STACK_SIZE_SINGLE,
                12,
            )
        },
        ItemDef {
            max_durability: Some(300),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -1,
                physical_defence: 1,
                ..CombatBonuses::default()
            },
            ..item(
                9,
                "bronze_gloves",
                "Bronze Gloves",
                ItemCategory::Armor,
                Some(EquipmentSlot::Gloves),
                STACK_SIZE_SINGLE,
                10,
            )
        },
        ItemDef {
            max_durability: Some(450),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                magic_attack: -2,
                physical_defence: 4,
                magic_defence: 1,
                ..CombatBonuses::default()
            },
            ..item(
                10,
                "bronze_shield",
                "Bronze Shield",
                ItemCategory::Armor,
                Some(EquipmentSlot::Shield),
                STACK_SIZE_SINGLE,
                25,
            )
        },
        ItemDef {
            max_durability: Some(400),
            required_skill: Some(SkillType::Defence),
            bonuses: CombatBonuses {
                ranged_attack: 2,
                physical_defence: 4,
                magic_defence: 4,
                ..CombatBonuses::default()
            },
            ..item(
                11,
                "leather_body",
                "Leather Body",
                ItemCategory::Armor,
                Some(EquipmentSlot::Body),
                STACK_SIZE_SINGLE,
                25,
            )
        },
        // Materials
        item(12, "copper_ore", "Copper Ore", ItemCategory::Material, None, STACK_SIZE_MATERIALS, 5),
        item(13, "tin_ore", "Tin Ore", ItemCategory::Material, None, STACK_SIZE_MATERIALS, 5),
        item(14, "bronze_bar", "Bronze Bar", ItemCategory::Material, None, STACK_SIZE_MATERIALS, 15),
        item(15, "oak_logs", "Oak Logs", ItemCategory::Material, None, STACK_SIZE_MATERIALS, 10),
        item(16, "raw_shrimp", "Raw Shrimp", ItemCategory::Material, None, STACK_SIZE_MATERIALS, 3),
        // Consumables
        item(
            17,
            "cooked_shrimp",
            "Cooked Shrimp",
            ItemCategory::Consumable,
            None,
            STACK_SIZE_CONSUMABLES,
            5,
        ),
        item(18, "bread", "Bread", ItemCategory::Consumable, None, STACK_SIZE_CONSUMABLES, 8),
        // Ammunition
        ItemDef {
            ammo_type: Some("arrows".to_string()),
            bonuses: CombatBonuses {
                ranged_strength: 1,
                ..CombatBonuses::default()
            },
            ..item(
                19,
                "bronze_arrows",
                "Bronze Arrows",
                ItemCategory::Ammunition,
                Some(EquipmentSlot::Ammo),
                STACK_SIZE_AMMUNITION,
                1,
            )
        },
        ItemDef {
            ammo_type: Some("arrows".to_string()),
            bonuses: CombatBonuses {
                ranged_strength: 3,
                ..CombatBonuses::default()
            },
            ..item(
                20,
                "iron_arrows",
                "Iron Arrows",
                ItemCategory::Ammunition,
                Some(EquipmentSlot::Ammo),
                STACK_SIZE_AMMUNITION,
                3,
            )
        },
        // Currency
        ItemDef {
            indestructible: true,
            ..item(
                21,
                "gold_coins",
                "Gold Coins",
                ItemCategory::Currency,
                None,
                STACK_SIZE_CURRENCY,
                1,
            )
        },
    ]
}

/// The built-in skill catalog. All skills currently share the base curve.
#[must_use]
pub fn builtin_skills() -> Vec<SkillDef> {
    SkillType::ALL
        .into_iter()
        .map(|skill| SkillDef {
            skill,
            xp_multiplier: 1.0,
        })
        .collect()
}

/// The built-in entity catalog.
#[must_use]
pub fn builtin_entities() -> Vec<EntityDef> {
    vec![
        EntityDef {
            id: 1,
            name: "GOBLIN".to_string(),
            display_name: "Goblin".to_string(),
            kind: EntityKind::Monster,
            behavior: EntityBehavior::Aggressive,
            is_attackable: true,
            level: 2,
            max_hp: 10,
            xp_reward: 25,
            aggro_radius: 5,
            disengage_radius: 10,
            respawn_time_secs: 30,
            attack_bonus: 1,
            strength_bonus: 1,
            defence_bonus: 1,
            attack_range: 1,
            attack_speed_secs: 2.4,
            drop_table: vec![("gold_coins".to_string(), 5)],
        },
        EntityDef {
            id: 2,
            name: "GIANT_RAT".to_string(),
            display_name: "Giant Rat".to_string(),
            kind: EntityKind::Monster,
            behavior: EntityBehavior::Passive,
            is_attackable: true,
            level: 1,
            max_hp: 5,
            xp_reward: 10,
            aggro_radius: 0,
            disengage_radius: 8,
            respawn_time_secs: 20,
            attack_bonus: 0,
            strength_bonus: 0,
            defence_bonus: 0,
            attack_range: 1,
            attack_speed_secs: 2.4,
            drop_table: Vec::new(),
        },
        EntityDef {
            id: 3,
            name: "GUARD".to_string(),
            display_name: "Town Guard".to_string(),
            kind: EntityKind::HumanoidNpc,
            behavior: EntityBehavior::Defensive,
            is_attackable: true,
            level: 10,
            max_hp: 40,
            xp_reward: 80,
            aggro_radius: 0,
            disengage_radius: 12,
            respawn_time_secs: 60,
            attack_bonus: 8,
            strength_bonus: 6,
            defence_bonus: 10,
            attack_range: 1,
            attack_speed_secs: 2.4,
            drop_table: vec![("gold_coins".to_string(), 20)],
        },
        EntityDef {
            id: 4,
            name: "SHOPKEEPER".to_string(),
            display_name: "Shopkeeper".to_string(),
            kind: EntityKind::HumanoidNpc,
            behavior: EntityBehavior::Stationary,
            is_attackable: false,
            level: 1,
            max_hp: 10,
            xp_reward: 0,
            aggro_radius: 0,
            disengage_radius: 0,
            respawn_time_secs: 60,
            attack_bonus: 0,
            strength_bonus: 0,
            defence_bonus: 0,
            attack_range: 1,
            attack_speed_secs: 2.4,
            drop_table: Vec::new(),
        },
    ]
}
