//! Combat service: attack resolution, XP awards, loot, and the player
//! death sequence.
//!
//! All randomness flows through the world's seedable RNG. Hit chance and
//! damage ceilings are derived from reference data (equipment bonuses,
//! skill levels, entity stats), never from hard-coded per-monster numbers.

use std::sync::Arc;

use rand::Rng;
use tilefall_core::constants::XP_PER_DAMAGE;
use tilefall_core::defs::ItemDef;
use tilefall_core::messages::{AttackOkPayload, XpGained};
use tilefall_core::skills::SkillType;
use tilefall_core::types::{chebyshev, CombatTargetType, Position};

use crate::state::{CombatState, EntityInstance, GroundItem, XpAward};
use crate::world::World;

use super::hp::HpService;
use super::result::{ErrorCode, ServiceError, ServiceResult};

/// Seconds between attacks recorded in a player's combat state.
pub const DEFAULT_ATTACK_SPEED_SECS: f64 = 2.4;

/// Reach of an unarmed attack, in tiles.
pub const UNARMED_RANGE: i32 = 1;

/// A resolved player attack: the wire payload plus the per-skill awards
/// the broadcaster turns into `event_skill_update`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackResolution {
    pub payload: AttackOkPayload,
    pub awards: Vec<XpAward>,
}

/// Result of an entity attacking a player (AI path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityAttackOutcome {
    pub hit: bool,
    pub damage: i32,
    pub player_hp: i32,
    pub player_died: bool,
}

/// Everything the broadcaster needs after a player dies.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerDeathOutcome {
    pub player_id: i64,
    pub died_at: Position,
    pub respawn_position: Position,
    pub max_hp: i32,
    pub dropped_items: Vec<GroundItem>,
}

/// Resolves attacks between players and entities.
pub struct CombatService {
    world: Arc<World>,
    hp: HpService,
}

impl CombatService {
    #[must_use]
    pub fn new(world: Arc<World>) -> Self {
        Self {
            hp: HpService::new(Arc::clone(&world)),
            world,
        }
    }

    /// Resolves `cmd_attack` for a player.
    pub async fn attack(
        &self,
        attacker_id: i64,
        target_type: CombatTargetType,
        target_id: i64,
    ) -> ServiceResult<AttackResolution> {
        if target_type == CombatTargetType::Player {
            return Err(ServiceError::new(
                ErrorCode::NotImplemented,
                "Player versus player combat is not implemented",
            ));
        }

        let Some(attacker_pos) = self
            .world
            .players
            .get_position(attacker_id)
            .await
            .map_err(ServiceError::from)?
        else {
            return Err(ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"));
        };

        let Some(entity) = self
            .world
            .entities
            .get(target_id)
            .await
            .map_err(ServiceError::from)?
        else {
            return Err(ServiceError::new(ErrorCode::NotFound, "Entity not found"));
        };
        let def = self
            .world
            .reference
            .entity(entity.entity_id)
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::Internal,
                    format!("missing entity definition {}", entity.entity_id),
                )
            })?
            .clone();
        if !def.is_attackable {
            return Err(ServiceError::new(
                ErrorCode::NotFound,
                format!("{} cannot be attacked", def.display_name),
            ));
        }
        if entity.is_dead() || entity.current_hp == 0 {
            return Err(ServiceError::new(ErrorCode::Dead, "Target is already dead"));
        }

        let weapon: Option<ItemDef> = self
            .world
            .equipment
            .weapon_def(attacker_id)
            .await
            .map_err(ServiceError::from)?
            .cloned();
        let range = weapon.as_ref().map_or(UNARMED_RANGE, |w| w.attack_range);
        if attacker_pos.map_id != entity.map_id
            || chebyshev(attacker_pos.x, attacker_pos.y, entity.x, entity.y) > range
        {
            return Err(ServiceError::new(ErrorCode::TooFar, "Target is too far away"));
        }

        // Ranged weapons consume one unit of matching ammo per attack,
        // hit or miss.
        let ranged_ammo = weapon.as_ref().and_then(|w| w.ammo_type.clone());
        if let Some(ammo_type) = &ranged_ammo {
            let remaining = self
                .world
                .equipment
                .consume_ammo(attacker_id, ammo_type, 1)
                .await
                .map_err(ServiceError::from)?;
            if remaining.is_none() {
                return Err(ServiceError::new(
                    ErrorCode::NoAmmo,
                    format!("No {ammo_type} equipped"),
                ));
            }
        }

        let now = self.world.clock.now_secs();
        self.world
            .players
            .set_combat_state(
                attacker_id,
                CombatState {
                    target_type: CombatTargetType::Entity,
                    target_id,
                    last_attack_time: now,
                    attack_speed_secs: DEFAULT_ATTACK_SPEED_SECS,
                },
            )
            .await
            .map_err(ServiceError::from)?;

        // Effective bonuses: equipment totals plus skill levels. Ranged
        // weapons use the ranged bonus columns; there is no separate
        // ranged skill, so the attack level covers both styles.
        let bonuses = self
            .world
            .equipment
            .total_bonuses(attacker_id)
            .await
            .map_err(ServiceError::from)?;
        let attack_level = self.skill_level(attacker_id, SkillType::Attack).await?;
        let strength_level = self.skill_level(attacker_id, SkillType::Strength).await?;
        let (attack_bonus, strength_bonus) = if ranged_ammo.is_some() {
            (bonuses.ranged_attack, bonuses.ranged_strength)
        } else {
            (bonuses.attack, bonuses.strength)
        };

        let attack_roll = i32::try_from(attack_level).unwrap_or(1) + attack_bonus.max(0);
        let defence_roll = def.defence_bonus + i32::try_from(def.level).unwrap_or(1);
        let max_hit = 1 + (i32::try_from(strength_level).unwrap_or(1) + strength_bonus.max(0)) / 3;

        let (hit, damage) = self.roll(attack_roll, defence_roll, max_hit);
        let damage = damage.min(entity.current_hp);

        let (defender_hp, defender_died) = if damage > 0 {
            let outcome = self
                .world
                .entities
                .apply_damage(target_id, damage)
                .await
                .map_err(ServiceError::from)?
                .ok_or_else(|| ServiceError::new(ErrorCode::NotFound, "Entity not found"))?;
            (outcome.current_hp, outcome.died)
        } else {
            (entity.current_hp, false)
        };

        let (xp_gained, awards) = if damage > 0 {
            self.award_damage_xp(attacker_id, damage).await?
        } else {
            (XpGained::default(), Vec::new())
        };

        if defender_died {
            self.on_entity_death(&entity, &def.drop_table, now).await?;
        }

        metrics::counter!("combat_attacks_total").increment(1);
        Ok(AttackResolution {
            payload: AttackOkPayload {
                hit,
                damage,
                defender_hp,
                defender_died,
                xp_gained,
            },
            awards,
        })
    }

    /// Resolves one entity-on-player attack (driven by the AI tick).
    pub async fn entity_attack_player(
        &self,
        instance: &EntityInstance,
        player_id: i64,
    ) -> ServiceResult<EntityAttackOutcome> {
        let def = self
            .world
            .reference
            .entity(instance.entity_id)
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::Internal,
                    format!("missing entity definition {}", instance.entity_id),
                )
            })?
            .clone();
        let Some(hp) = self
            .world
            .players
            .get_hp(player_id)
            .await
            .map_err(ServiceError::from)?
        else {
            return Err(ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"));
        };
        if hp.is_dead() {
            return Err(ServiceError::new(ErrorCode::Dead, "Player is already dead"));
        }

        let defence_level = self.skill_level(player_id, SkillType::Defence).await?;
        let player_defence = self
            .world
            .equipment
            .total_bonuses(player_id)
            .await
            .map_err(ServiceError::from)?
            .physical_defence;

        let attack_roll = def.attack_bonus + i32::try_from(def.level).unwrap_or(1);
        let defence_roll = i32::try_from(defence_level).unwrap_or(1) + player_defence.max(0);
        let max_hit = 1 + (def.strength_bonus + i32::try_from(def.level).unwrap_or(1)) / 3;

        let (hit, damage) = self.roll(attack_roll, defence_roll, max_hit);
        let damage = damage.min(hp.current_hp);

        let (player_hp, player_died) = if damage > 0 {
            let outcome = self
                .world
                .players
                .apply_damage(player_id, damage)
                .await
                .map_err(ServiceError::from)?;
            (outcome.current_hp, outcome.died)
        } else {
            (hp.current_hp, false)
        };

        Ok(EntityAttackOutcome {
            hit,
            damage,
            player_hp,
            player_died,
        })
    }

    /// The death sequence: drop non-indestructible inventory as
    /// owner-private ground items, reset to the map spawn with full HP,
    /// leave combat state cleared.
    pub async fn handle_player_death(
        &self,
        player_id: i64,
    ) -> ServiceResult<PlayerDeathOutcome> {
        let position = self
            .world
            .players
            .get_position(player_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"))?;
        let died_at = Position::new(position.map_id.clone(), position.x, position.y);

        let mut dropped_items = Vec::new();
        for (slot, record) in self
            .world
            .inventories
            .get_inventory(player_id)
            .await
            .map_err(ServiceError::from)?
        {
            let indestructible = self
                .world
                .reference
                .item(record.item_id)
                .is_some_and(|d| d.indestructible);
            if indestructible {
                continue;
            }
            self.world
                .inventories
                .delete_slot(player_id, slot)
                .await
                .map_err(ServiceError::from)?;
            let item = self
                .world
                .ground_items
                .create(
                    record.item_id,
                    &died_at.map_id,
                    died_at.x,
                    died_at.y,
                    record.quantity,
                    record.current_durability,
                    Some(player_id),
                )
                .await
                .map_err(ServiceError::from)?;
            dropped_items.push(item);
        }

        // Reset: full HP back at the map spawn, combat left cleared.
        let (respawn_position, restored) = self.hp.respawn(player_id).await?;

        metrics::counter!("player_deaths_total").increment(1);
        Ok(PlayerDeathOutcome {
            player_id,
            died_at,
            respawn_position,
            max_hp: restored.max_hp,
            dropped_items,
        })
    }

    async fn skill_level(&self, player_id: i64, skill: SkillType) -> ServiceResult<u32> {
        Ok(self
            .world
            .skills
            .get_skill(player_id, skill)
            .await
            .map_err(ServiceError::from)?
            .map_or_else(|| skill.starting_level(), |r| r.level))
    }

    /// One attack roll: hit chance from the opposing rolls, then a uniform
    /// damage roll up to `max_hit`.
    fn roll(&self, attack_roll: i32, defence_roll: i32, max_hit: i32) -> (bool, i32) {
        let attack = f64::from(attack_roll.max(1));
        let defence = f64::from(defence_roll.max(0));
        let chance = (attack / (attack + defence)).clamp(0.05, 0.95);

        let mut rng = self.world.rng.lock();
        let hit = rng.random_bool(chance);
        if !hit {
            return (false, 0);
        }
        (true, rng.random_range(0..=max_hit.max(1)))
    }

    async fn award_damage_xp(
        &self,
        player_id: i64,
        damage: i32,
    ) -> ServiceResult<(XpGained, Vec<crate::state::XpAward>)> {
        let damage = u64::try_from(damage).unwrap_or(0);
        let melee_xp = damage * u64::from(XP_PER_DAMAGE);
        let hp_xp = melee_xp / 3;

        let gained = XpGained {
            attack: melee_xp,
            strength: melee_xp,
            hitpoints: hp_xp,
        };
        let mut awards = Vec::with_capacity(3);
        for (skill, amount) in [
            (SkillType::Attack, melee_xp),
            (SkillType::Strength, melee_xp),
            (SkillType::Hitpoints, hp_xp),
        ] {
            if let Some(award) = self
                .world
                .skills
                .add_experience(player_id, skill, amount)
                .await
                .map_err(ServiceError::from)?
            {
                awards.push(award);
            }
        }
        Ok((gained, awards))
    }

    /// Post-kill bookkeeping: queue the spawn point and drop loot where
    /// the entity stood.
    async fn on_entity_death(
        &self,
        entity: &EntityInstance,
        drop_table: &[(String, u32)],
        now: f64,
    ) -> ServiceResult<()> {
        self.world
            .entities
            .schedule_respawn(
                &entity.map_id,
                entity.spawn_point_id,
                now + f64::from(entity.respawn_delay_secs),
            )
            .await
            .map_err(ServiceError::from)?;

        for (item_name, quantity) in drop_table {
            if let Some(def) = self.world.reference.item_by_name(item_name) {
                self.world
                    .ground_items
                    .create(def.id, &entity.map_id, entity.x, entity.y, *quantity, None, None)
                    .await
                    .map_err(ServiceError::from)?;
            }
        }
        Ok(())
    }
}
