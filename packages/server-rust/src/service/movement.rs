//! Movement service: direction validation, cooldown, collision, and the
//! atomic position write.

use std::sync::Arc;

use tilefall_core::types::{Direction, Position};

use crate::world::World;

use super::result::{ErrorCode, ServiceError, ServiceResult};

/// A successful movement.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementOutcome {
    pub old_position: Position,
    pub new_position: Position,
    pub direction: Direction,
}

/// Arbitrates all player movement.
pub struct MovementService {
    world: Arc<World>,
}

impl MovementService {
    #[must_use]
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }

    /// Executes one step for a player.
    ///
    /// Order of checks: direction, online, cooldown, boundary, collision.
    /// On success the position write also advances `last_move_time` and
    /// clears combat state in the same atomic cache update, then marks the
    /// player dirty.
    pub async fn execute_movement(
        &self,
        player_id: i64,
        direction_raw: &str,
    ) -> ServiceResult<MovementOutcome> {
        let Ok(direction) = direction_raw.parse::<Direction>() else {
            return Err(ServiceError::new(
                ErrorCode::InvalidDirection,
                format!("'{direction_raw}' is not a direction"),
            ));
        };

        if !self.world.players.is_online(player_id).await.map_err(ServiceError::from)? {
            return Err(ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"));
        }
        let Some(position) = self
            .world
            .players
            .get_position(player_id)
            .await
            .map_err(ServiceError::from)?
        else {
            return Err(ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"));
        };

        let now = self.world.clock.now_secs();
        let cooldown = self.world.settings.movement_cooldown_secs;
        let elapsed = now - position.last_move_time;
        if elapsed < cooldown {
            return Err(ServiceError::new(
                ErrorCode::RateLimited,
                "Movement cooldown active",
            )
            .with_cooldown(cooldown - elapsed));
        }

        let (new_x, new_y) = direction.step_from(position.x, position.y);
        if (new_x, new_y) == (position.x, position.y) {
            // Clamped at the map origin: a step that goes nowhere is a
            // collision with the world edge.
            return Err(ServiceError::new(
                ErrorCode::Blocked,
                "Movement blocked by map boundary",
            )
            .with_collision());
        }
        if !self
            .world
            .maps
            .is_valid_move(&position.map_id, position.x, position.y, new_x, new_y)
        {
            return Err(ServiceError::new(
                ErrorCode::Blocked,
                "Movement blocked by obstacle",
            )
            .with_collision());
        }

        self.world
            .players
            .set_position(
                player_id,
                new_x,
                new_y,
                &position.map_id,
                Some(direction.as_str()),
                true,
            )
            .await
            .map_err(ServiceError::from)?;

        Ok(MovementOutcome {
            old_position: Position::new(position.map_id.clone(), position.x, position.y),
            new_position: Position::new(position.map_id, new_x, new_y),
            direction,
        })
    }

    /// Moves a player directly, bypassing the cooldown.
    ///
    /// Still rejects negative coordinates and, when `validate` is set,
    /// non-walkable destinations.
    pub async fn teleport(
        &self,
        player_id: i64,
        x: i32,
        y: i32,
        map_id: &str,
        validate: bool,
    ) -> ServiceResult<Position> {
        if x < 0 || y < 0 {
            return Err(ServiceError::new(
                ErrorCode::InvalidPosition,
                "Coordinates cannot be negative",
            ));
        }
        if validate && !self.world.maps.is_walkable(map_id, x, y) {
            return Err(
                ServiceError::new(ErrorCode::Blocked, "Position is not walkable").with_collision(),
            );
        }
        self.world
            .players
            .set_position(player_id, x, y, map_id, None, false)
            .await
            .map_err(ServiceError::from)?;
        Ok(Position::new(map_id, x, y))
    }
}
