//! Hitpoints service: damage, healing, and respawn for players.
//!
//! Death handling (inventory drop, events) composes on top of
//! [`deal_damage`](HpService::deal_damage) in the combat service; this
//! layer only guarantees the HP arithmetic and the respawn reset.

use std::sync::Arc;

use tilefall_core::types::Position;

use crate::state::{DamageOutcome, HpState};
use crate::world::World;

use super::result::{ErrorCode, ServiceError, ServiceResult};

/// Player HP arithmetic over the player state manager.
pub struct HpService {
    world: Arc<World>,
}

impl HpService {
    #[must_use]
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }

    /// Current and max HP. Fails with `player_not_online` when the player
    /// has no state anywhere.
    pub async fn get_hp(&self, player_id: i64) -> ServiceResult<HpState> {
        self.world
            .players
            .get_hp(player_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"))
    }

    /// Applies damage; overkill clamps to 0. The kill also clears combat
    /// state atomically inside the manager.
    pub async fn deal_damage(&self, player_id: i64, amount: i32) -> ServiceResult<DamageOutcome> {
        self.world
            .players
            .apply_damage(player_id, amount)
            .await
            .map_err(ServiceError::from)
    }

    /// Heals up to max HP, returning the new current HP.
    pub async fn heal(&self, player_id: i64, amount: i32) -> ServiceResult<i32> {
        self.world
            .players
            .apply_heal(player_id, amount)
            .await
            .map_err(ServiceError::from)
    }

    /// Respawn reset: full HP, position back to the map spawn, combat
    /// state cleared. Returns the respawn position.
    pub async fn respawn(&self, player_id: i64) -> ServiceResult<(Position, HpState)> {
        let position = self
            .world
            .players
            .get_position(player_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"))?;
        let hp = self.get_hp(player_id).await?;

        let (spawn_x, spawn_y) = self
            .world
            .maps
            .spawn_position(&position.map_id)
            .ok_or_else(|| {
                ServiceError::new(ErrorCode::NotFound, format!("unknown map {}", position.map_id))
            })?;

        self.world
            .players
            .set_hp(player_id, hp.max_hp, hp.max_hp)
            .await
            .map_err(ServiceError::from)?;
        self.world
            .players
            .set_position(player_id, spawn_x, spawn_y, &position.map_id, None, false)
            .await
            .map_err(ServiceError::from)?;
        self.world
            .players
            .clear_combat_state(player_id)
            .await
            .map_err(ServiceError::from)?;

        Ok((
            Position::new(position.map_id, spawn_x, spawn_y),
            HpState {
                current_hp: hp.max_hp,
                max_hp: hp.max_hp,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::test_world;

    #[tokio::test]
    async fn damage_heal_and_clamps() {
        let (world, _) = test_world();
        let service = HpService::new(Arc::clone(&world));
        world
            .players
            .set_full_state(1, "samplemap", 10, 10, "down", 50, 100)
            .await
            .unwrap();

        let outcome = service.deal_damage(1, 20).await.unwrap();
        assert_eq!(outcome.current_hp, 30);
        assert!(!outcome.died);

        assert_eq!(service.heal(1, 1000).await.unwrap(), 100);

        let outcome = service.deal_damage(1, 250).await.unwrap();
        assert_eq!(outcome.current_hp, 0, "overkill clamps to zero");
        assert!(outcome.died);

        let hp = service.get_hp(1).await.unwrap();
        assert_eq!(hp.current_hp, 0);
        assert_eq!(hp.max_hp, 100);
    }

    #[tokio::test]
    async fn unknown_player_has_no_hp() {
        let (world, _) = test_world();
        let service = HpService::new(world);
        let err = service.get_hp(404).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PlayerNotOnline);
    }

    #[tokio::test]
    async fn respawn_resets_hp_position_and_combat() {
        let (world, _) = test_world();
        let service = HpService::new(Arc::clone(&world));
        world
            .players
            .set_full_state(1, "samplemap", 3, 4, "down", 0, 100)
            .await
            .unwrap();

        let (position, hp) = service.respawn(1).await.unwrap();
        // The test map spawns at its center.
        assert_eq!((position.x, position.y), (32, 32));
        assert_eq!(hp.current_hp, 100);

        let stored = world.players.get_position(1).await.unwrap().unwrap();
        assert_eq!((stored.x, stored.y), (32, 32));
        assert!(world.players.get_combat_state(1).await.unwrap().is_none());
    }
}
