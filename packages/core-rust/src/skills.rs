//! Skill identifiers and the experience curve.
//!
//! Levels are always derived from total experience: the curve is monotonic,
//! so `level_for_xp(xp_for_level(n, m), m) == n` for any level `n` and
//! multiplier `m >= 1`. A skill definition may scale its curve with a
//! multiplier (`> 1.0` means the skill levels slower).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hitpoints starts at this level for a fresh player; every other skill
/// starts at level 1 with zero experience.
pub const HITPOINTS_START_LEVEL: u32 = 10;

/// Highest attainable skill level.
pub const MAX_SKILL_LEVEL: u32 = 99;

/// The trainable skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    Attack,
    Strength,
    Defence,
    Hitpoints,
    Mining,
    Fishing,
    Woodcutting,
    Cooking,
    Crafting,
}

impl SkillType {
    /// All skills, in registration order.
    pub const ALL: [SkillType; 9] = [
        SkillType::Attack,
        SkillType::Strength,
        SkillType::Defence,
        SkillType::Hitpoints,
        SkillType::Mining,
        SkillType::Fishing,
        SkillType::Woodcutting,
        SkillType::Cooking,
        SkillType::Crafting,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkillType::Attack => "attack",
            SkillType::Strength => "strength",
            SkillType::Defence => "defence",
            SkillType::Hitpoints => "hitpoints",
            SkillType::Mining => "mining",
            SkillType::Fishing => "fishing",
            SkillType::Woodcutting => "woodcutting",
            SkillType::Cooking => "cooking",
            SkillType::Crafting => "crafting",
        }
    }

    /// Level a fresh player starts this skill at.
    #[must_use]
    pub fn starting_level(self) -> u32 {
        if self == SkillType::Hitpoints {
            HITPOINTS_START_LEVEL
        } else {
            1
        }
    }
}

impl fmt::Display for SkillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attack" => Ok(SkillType::Attack),
            "strength" => Ok(SkillType::Strength),
            "defence" => Ok(SkillType::Defence),
            "hitpoints" => Ok(SkillType::Hitpoints),
            "mining" => Ok(SkillType::Mining),
            "fishing" => Ok(SkillType::Fishing),
            "woodcutting" => Ok(SkillType::Woodcutting),
            "cooking" => Ok(SkillType::Cooking),
            "crafting" => Ok(SkillType::Crafting),
            _ => Err(()),
        }
    }
}

/// Points contributed by one level step on the quarter-sum curve:
/// `floor(level + 300 * 2^(level/7))`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn step_points(level: u32) -> u64 {
    let l = f64::from(level);
    (l + 300.0 * (l / 7.0).exp2()).floor() as u64
}

/// Total experience required to reach `level` on a skill with the given
/// curve multiplier.
///
/// The classic quarter-sum curve: sum the per-level points, floor, divide
/// by four. Level 1 is 0 experience; levels are clamped to
/// `1..=MAX_SKILL_LEVEL`. The multiplier scales the whole threshold and is
/// itself clamped to be at least 1.0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn xp_for_level(level: u32, multiplier: f64) -> u64 {
    let level = level.clamp(1, MAX_SKILL_LEVEL);
    let multiplier = multiplier.max(1.0);
    let points: u64 = (1..level).map(step_points).sum();
    ((points / 4) as f64 * multiplier).floor() as u64
}

/// Level reached with `xp` total experience under the given multiplier.
///
/// Inverse of [`xp_for_level`]: the largest level whose threshold is at
/// most `xp`, capped at [`MAX_SKILL_LEVEL`].
#[must_use]
pub fn level_for_xp(xp: u64, multiplier: f64) -> u32 {
    let mut level = 1;
    while level < MAX_SKILL_LEVEL && xp_for_level(level + 1, multiplier) <= xp {
        level += 1;
    }
    level
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn level_one_needs_no_xp() {
        assert_eq!(xp_for_level(1, 1.0), 0);
        assert_eq!(level_for_xp(0, 1.0), 1);
    }

    #[test]
    fn curve_matches_known_thresholds() {
        // First steps of the quarter-sum curve.
        assert_eq!(xp_for_level(2, 1.0), 83);
        assert_eq!(xp_for_level(3, 1.0), 174);
        assert_eq!(xp_for_level(4, 1.0), 276);
        assert_eq!(xp_for_level(5, 1.0), 388);
    }

    #[test]
    fn curve_is_strictly_monotonic() {
        let mut prev = xp_for_level(1, 1.0);
        for level in 2..=MAX_SKILL_LEVEL {
            let next = xp_for_level(level, 1.0);
            assert!(next > prev, "level {level} threshold must grow");
            prev = next;
        }
    }

    #[test]
    fn multiplier_scales_thresholds() {
        let base = xp_for_level(10, 1.0);
        let scaled = xp_for_level(10, 2.0);
        assert_eq!(scaled, base * 2);
    }

    #[test]
    fn multiplier_below_one_is_clamped() {
        assert_eq!(xp_for_level(10, 0.5), xp_for_level(10, 1.0));
    }

    #[test]
    fn level_caps_at_max() {
        assert_eq!(level_for_xp(u64::MAX, 1.0), MAX_SKILL_LEVEL);
        assert_eq!(xp_for_level(MAX_SKILL_LEVEL + 50, 1.0), xp_for_level(MAX_SKILL_LEVEL, 1.0));
    }

    #[test]
    fn hitpoints_starts_at_ten() {
        assert_eq!(SkillType::Hitpoints.starting_level(), 10);
        assert_eq!(SkillType::Attack.starting_level(), 1);
        assert_eq!(SkillType::Crafting.starting_level(), 1);
    }

    #[test]
    fn skill_names_round_trip() {
        for skill in SkillType::ALL {
            assert_eq!(skill.as_str().parse::<SkillType>(), Ok(skill));
        }
        assert!("alchemy".parse::<SkillType>().is_err());
    }

    proptest! {
        #[test]
        fn level_for_xp_inverts_xp_for_level(level in 1u32..=99, mult in 1.0f64..3.0) {
            let xp = xp_for_level(level, mult);
            prop_assert_eq!(level_for_xp(xp, mult), level);
            // One XP short of the threshold stays on the previous level.
            if level > 1 {
                prop_assert_eq!(level_for_xp(xp - 1, mult), level - 1);
            }
        }
    }
}
