//! Domain vocabulary shared between client protocol and server state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Cardinal movement direction.
///
/// The wire accepts compass synonyms (`north`/`south`/`west`/`east`)
/// case-insensitively; the canonical serialized form is lowercase
/// `up`/`down`/`left`/`right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Tile offset `(dx, dy)` for one step. Up is negative Y.
    #[must_use]
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Applies one step from `(x, y)`, clamping both coordinates at 0.
    #[must_use]
    pub fn step_from(self, x: i32, y: i32) -> (i32, i32) {
        let (dx, dy) = self.offset();
        ((x + dx).max(0), (y + dy).max(0))
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "north" => Ok(Direction::Up),
            "down" | "south" => Ok(Direction::Down),
            "left" | "west" => Ok(Direction::Left),
            "right" | "east" => Ok(Direction::Right),
            _ => Err(()),
        }
    }
}

/// A tile position on a named map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub map_id: String,
    pub x: i32,
    pub y: i32,
}

impl Position {
    #[must_use]
    pub fn new(map_id: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            map_id: map_id.into(),
            x,
            y,
        }
    }
}

/// Chebyshev (chessboard) distance between two tiles.
///
/// This is the nearness metric for aggro, attack range, and nearby-player
/// queries: diagonally adjacent tiles count as distance 1.
#[must_use]
pub fn chebyshev(x1: i32, y1: i32, x2: i32, y2: i32) -> i32 {
    (x1 - x2).abs().max((y1 - y2).abs())
}

/// Named equipment slot. At most one item per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentSlot {
    Head,
    Body,
    Legs,
    Boots,
    Gloves,
    Weapon,
    Shield,
    Ammo,
    Cape,
    Ring,
    Amulet,
}

impl EquipmentSlot {
    /// All slots, in display order.
    pub const ALL: [EquipmentSlot; 11] = [
        EquipmentSlot::Head,
        EquipmentSlot::Body,
        EquipmentSlot::Legs,
        EquipmentSlot::Boots,
        EquipmentSlot::Gloves,
        EquipmentSlot::Weapon,
        EquipmentSlot::Shield,
        EquipmentSlot::Ammo,
        EquipmentSlot::Cape,
        EquipmentSlot::Ring,
        EquipmentSlot::Amulet,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EquipmentSlot::Head => "head",
            EquipmentSlot::Body => "body",
            EquipmentSlot::Legs => "legs",
            EquipmentSlot::Boots => "boots",
            EquipmentSlot::Gloves => "gloves",
            EquipmentSlot::Weapon => "weapon",
            EquipmentSlot::Shield => "shield",
            EquipmentSlot::Ammo => "ammo",
            EquipmentSlot::Cape => "cape",
            EquipmentSlot::Ring => "ring",
            EquipmentSlot::Amulet => "amulet",
        }
    }
}

impl fmt::Display for EquipmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EquipmentSlot {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" => Ok(EquipmentSlot::Head),
            "body" => Ok(EquipmentSlot::Body),
            "legs" => Ok(EquipmentSlot::Legs),
            "boots" => Ok(EquipmentSlot::Boots),
            "gloves" => Ok(EquipmentSlot::Gloves),
            "weapon" => Ok(EquipmentSlot::Weapon),
            "shield" => Ok(EquipmentSlot::Shield),
            "ammo" => Ok(EquipmentSlot::Ammo),
            "cape" => Ok(EquipmentSlot::Cape),
            "ring" => Ok(EquipmentSlot::Ring),
            "amulet" => Ok(EquipmentSlot::Amulet),
            _ => Err(()),
        }
    }
}

/// Lifecycle state of a spawned entity instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    Idle,
    Walk,
    Attack,
    Dying,
    Dead,
}

impl EntityState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityState::Idle => "idle",
            EntityState::Walk => "walk",
            EntityState::Attack => "attack",
            EntityState::Dying => "dying",
            EntityState::Dead => "dead",
        }
    }

    /// Whether the entity participates in the world (can be seen/attacked).
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, EntityState::Dying | EntityState::Dead)
    }
}

impl FromStr for EntityState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(EntityState::Idle),
            "walk" => Ok(EntityState::Walk),
            "attack" => Ok(EntityState::Attack),
            "dying" => Ok(EntityState::Dying),
            "dead" => Ok(EntityState::Dead),
            _ => Err(()),
        }
    }
}

/// AI behavior pattern from the entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityBehavior {
    Passive,
    Aggressive,
    Defensive,
    Stationary,
}

/// What kind of thing an attack command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatTargetType {
    Entity,
    Player,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_cardinal_names() {
        assert_eq!("up".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("down".parse::<Direction>(), Ok(Direction::Down));
        assert_eq!("left".parse::<Direction>(), Ok(Direction::Left));
        assert_eq!("right".parse::<Direction>(), Ok(Direction::Right));
    }

    #[test]
    fn direction_parses_compass_synonyms() {
        assert_eq!("north".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("south".parse::<Direction>(), Ok(Direction::Down));
        assert_eq!("west".parse::<Direction>(), Ok(Direction::Left));
        assert_eq!("east".parse::<Direction>(), Ok(Direction::Right));
    }

    #[test]
    fn direction_parse_is_case_insensitive() {
        assert_eq!("UP".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("Down".parse::<Direction>(), Ok(Direction::Down));
        assert_eq!("NORTH".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!(" east ".parse::<Direction>(), Ok(Direction::Right));
    }

    #[test]
    fn direction_rejects_garbage() {
        assert!("diagonal".parse::<Direction>().is_err());
        assert!("northwest".parse::<Direction>().is_err());
        assert!(String::new().parse::<Direction>().is_err());
        assert!("  ".parse::<Direction>().is_err());
        assert!("jump".parse::<Direction>().is_err());
    }

    #[test]
    fn step_moves_exactly_one_tile() {
        assert_eq!(Direction::Up.step_from(10, 10), (10, 9));
        assert_eq!(Direction::Down.step_from(10, 10), (10, 11));
        assert_eq!(Direction::Left.step_from(10, 10), (9, 10));
        assert_eq!(Direction::Right.step_from(10, 10), (11, 10));
    }

    #[test]
    fn step_clamps_at_origin() {
        assert_eq!(Direction::Up.step_from(0, 0), (0, 0));
        assert_eq!(Direction::Left.step_from(0, 0), (0, 0));
        assert_eq!(Direction::Down.step_from(0, 0), (0, 1));
        assert_eq!(Direction::Right.step_from(0, 0), (1, 0));
    }

    #[test]
    fn chebyshev_counts_diagonals_as_one() {
        assert_eq!(chebyshev(0, 0, 1, 1), 1);
        assert_eq!(chebyshev(10, 10, 12, 11), 2);
        assert_eq!(chebyshev(5, 5, 5, 5), 0);
        assert_eq!(chebyshev(10, 10, 30, 30), 20);
    }

    #[test]
    fn equipment_slot_round_trips_through_str() {
        for slot in EquipmentSlot::ALL {
            assert_eq!(slot.as_str().parse::<EquipmentSlot>(), Ok(slot));
        }
        assert!("backpack".parse::<EquipmentSlot>().is_err());
    }

    #[test]
    fn entity_state_liveness() {
        assert!(EntityState::Idle.is_live());
        assert!(EntityState::Walk.is_live());
        assert!(EntityState::Attack.is_live());
        assert!(!EntityState::Dying.is_live());
        assert!(!EntityState::Dead.is_live());
    }

    #[test]
    fn direction_serializes_lowercase() {
        let bytes = rmp_serde::to_vec_named(&Direction::Up).unwrap();
        let s: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(s, "up");
    }

    #[test]
    fn equipment_slot_serializes_lowercase() {
        let bytes = rmp_serde::to_vec_named(&EquipmentSlot::Weapon).unwrap();
        let s: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(s, "weapon");
    }
}
