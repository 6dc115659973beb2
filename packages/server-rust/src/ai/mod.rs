//! Entity AI tick: aggro, wander, chase, attack, death, and respawn.
//!
//! One ticker drives every live entity instance plus the periodic sweeps
//! that ride the same cadence: ground-item privacy reveals and despawns,
//! the respawn queue, and the per-session state updates.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tilefall_core::types::{chebyshev, Direction, EntityBehavior, EntityState};
use tokio::sync::watch;
use tracing::warn;

use crate::events::EventBroadcaster;
use crate::service::CombatService;
use crate::state::EntityInstance;
use crate::world::World;

/// Probability per tick that an idle entity takes a wander step.
const DEFAULT_WANDER_CHANCE: f64 = 0.1;

/// The world ticker.
pub struct EntityAiTicker {
    world: Arc<World>,
    combat: CombatService,
    broadcaster: Arc<EventBroadcaster>,
    tick_interval: Duration,
    wander_chance: f64,
}

impl EntityAiTicker {
    #[must_use]
    pub fn new(
        world: Arc<World>,
        broadcaster: Arc<EventBroadcaster>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            combat: CombatService::new(Arc::clone(&world)),
            world,
            broadcaster,
            tick_interval,
            wander_chance: DEFAULT_WANDER_CHANCE,
        }
    }

    /// Overrides the wander probability (tests pin it to 0 or 1).
    #[must_use]
    pub fn with_wander_chance(mut self, chance: f64) -> Self {
        self.wander_chance = chance;
        self
    }

    /// Runs the ticker until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(%err, "ai tick failed");
                    }
                }
            }
        }
    }

    /// One world tick.
    pub async fn tick(&self) -> anyhow::Result<()> {
        let now = self.world.clock.now_secs();
        let map_ids: Vec<String> = self.world.maps.iter().map(|m| m.id.clone()).collect();

        self.respawn_due_spawn_points(now).await?;

        for map_id in &map_ids {
            for instance in self.world.entities.instances_on_map(map_id).await? {
                if let Err(err) = self.step_entity(instance, now).await {
                    warn!(%err, "entity step failed");
                }
            }
        }

        for item in self.world.ground_items.sweep_newly_public(&map_ids).await? {
            self.broadcaster.ground_item_went_public(&item);
        }
        for item in self.world.ground_items.sweep_expired(&map_ids).await? {
            self.broadcaster.ground_item_despawned(&item);
        }

        if let Err(err) = self.broadcaster.broadcast_state_updates().await {
            warn!(%err, "state update broadcast failed");
        }
        Ok(())
    }

    /// Re-spawns every spawn point whose respawn time has come, at its
    /// original coordinates with full HP.
    async fn respawn_due_spawn_points(&self, now: f64) -> anyhow::Result<()> {
        for due in self.world.entities.due_respawns(now).await? {
            let Some(map) = self.world.maps.get(&due.map_id) else {
                continue;
            };
            let Some(point) = map
                .spawn_points
                .iter()
                .find(|p| p.id == due.spawn_point_id)
            else {
                continue;
            };
            let Some(def) = self.world.reference.entity_by_name(&point.entity) else {
                continue;
            };
            self.world
                .entities
                .spawn(
                    def,
                    &due.map_id,
                    point.x,
                    point.y,
                    point.id,
                    point.wander_radius,
                    None,
                )
                .await?;
        }
        Ok(())
    }

    async fn step_entity(&self, mut instance: EntityInstance, now: f64) -> anyhow::Result<()> {
        let Some(def) = self.world.reference.entity(instance.entity_id).cloned() else {
            return Ok(());
        };

        // Spawn points may override the definition's radii.
        let point = self.world.maps.get(&instance.map_id).and_then(|m| {
            m.spawn_points
                .iter()
                .find(|p| p.id == instance.spawn_point_id)
        });
        let aggro_radius = point
            .and_then(|p| p.aggro_override)
            .unwrap_or(def.aggro_radius);
        let disengage_radius = point
            .and_then(|p| p.disengage_override)
            .unwrap_or(def.disengage_radius);

        match instance.state {
            EntityState::Idle => {
                if def.behavior == EntityBehavior::Aggressive && aggro_radius > 0 {
                    let nearby = self
                        .world
                        .players
                        .nearby_player_ids(
                            &instance.map_id,
                            instance.x,
                            instance.y,
                            aggro_radius,
                            None,
                        )
                        .await?;
                    if let Some(target) = nearby.first() {
                        instance.target_player_id = Some(*target);
                        instance.state = EntityState::Walk;
                        self.world.entities.update(&instance).await?;
                        return Ok(());
                    }
                }
                if def.behavior != EntityBehavior::Stationary && instance.wander_radius > 0 {
                    self.maybe_wander(&mut instance).await?;
                }
            }
            EntityState::Walk => {
                self.step_walk(&mut instance, &def, disengage_radius, now).await?;
            }
            EntityState::Attack => {
                self.step_attack(&mut instance, &def, disengage_radius, now)
                    .await?;
            }
            EntityState::Dying => {
                let held_since = instance.dying_at.unwrap_or(now);
                if now - held_since >= self.world.settings.entity_dying_secs {
                    instance.state = EntityState::Dead;
                    // Respawn was queued at kill time; the corpse just
                    // leaves the world.
                    self.world.entities.remove(&instance).await?;
                }
            }
            EntityState::Dead => {
                self.world.entities.remove(&instance).await?;
            }
        }
        Ok(())
    }

    /// Low-probability one-tile wander that stays inside the wander radius.
    async fn maybe_wander(&self, instance: &mut EntityInstance) -> anyhow::Result<()> {
        let (roll, direction) = {
            let mut rng = self.world.rng.lock();
            let roll: f64 = rng.random();
            let direction = [
                Direction::Up,
                Direction::Down,
                Direction::Left,
                Direction::Right,
            ][rng.random_range(0..4)];
            (roll, direction)
        };
        if roll >= self.wander_chance {
            return Ok(());
        }
        let (nx, ny) = direction.step_from(instance.x, instance.y);
        if chebyshev(nx, ny, instance.spawn_x, instance.spawn_y) > instance.wander_radius {
            return Ok(());
        }
        if !self
            .world
            .maps
            .is_valid_move(&instance.map_id, instance.x, instance.y, nx, ny)
        {
            return Ok(());
        }
        instance.x = nx;
        instance.y = ny;
        self.world.entities.update(instance).await?;
        Ok(())
    }

    async fn target_position(
        &self,
        instance: &EntityInstance,
    ) -> anyhow::Result<Option<(i64, i32, i32)>> {
        let Some(target) = instance.target_player_id else {
            return Ok(None);
        };
        if !self.world.players.is_online(target).await? {
            return Ok(None);
        }
        let Some(position) = self.world.players.get_position(target).await? else {
            return Ok(None);
        };
        if position.map_id != instance.map_id {
            return Ok(None);
        }
        Ok(Some((target, position.x, position.y)))
    }

    async fn step_walk(
        &self,
        instance: &mut EntityInstance,
        def: &tilefall_core::defs::EntityDef,
        disengage_radius: i32,
        _now: f64,
    ) -> anyhow::Result<()> {
        match self.target_position(instance).await? {
            Some((_, tx, ty)) => {
                // Too far from home: give up and walk back.
                if chebyshev(instance.x, instance.y, instance.spawn_x, instance.spawn_y)
                    > disengage_radius
                {
                    instance.target_player_id = None;
                    self.step_towards(instance, instance.spawn_x, instance.spawn_y)
                        .await?;
                } else if chebyshev(instance.x, instance.y, tx, ty) <= def.attack_range {
                    instance.state = EntityState::Attack;
                    self.world.entities.update(instance).await?;
                } else {
                    self.step_towards(instance, tx, ty).await?;
                }
            }
            None => {
                instance.target_player_id = None;
                if (instance.x, instance.y) == (instance.spawn_x, instance.spawn_y) {
                    instance.state = EntityState::Idle;
                    self.world.entities.update(instance).await?;
                } else {
                    self.step_towards(instance, instance.spawn_x, instance.spawn_y)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn step_attack(
        &self,
        instance: &mut EntityInstance,
        def: &tilefall_core::defs::EntityDef,
        _disengage_radius: i32,
        now: f64,
    ) -> anyhow::Result<()> {
        let Some((target, tx, ty)) = self.target_position(instance).await? else {
            instance.target_player_id = None;
            instance.state = EntityState::Walk;
            self.world.entities.update(instance).await?;
            return Ok(());
        };
        if chebyshev(instance.x, instance.y, tx, ty) > def.attack_range {
            instance.state = EntityState::Walk;
            self.world.entities.update(instance).await?;
            return Ok(());
        }
        if now - instance.last_attack_time < def.attack_speed_secs {
            return Ok(());
        }

        instance.last_attack_time = now;
        match self.combat.entity_attack_player(instance, target).await {
            Ok(outcome) if outcome.player_died => {
                match self.combat.handle_player_death(target).await {
                    Ok(death) => self.broadcaster.player_died(&death),
                    Err(err) => warn!(%err, player_id = target, "death sequence failed"),
                }
                instance.target_player_id = None;
                instance.state = EntityState::Idle;
            }
            Ok(_) => {}
            Err(err) => {
                // Target despawned mid-swing; disengage.
                warn!(%err, "entity attack failed");
                instance.target_player_id = None;
                instance.state = EntityState::Walk;
            }
        }
        self.world.entities.update(instance).await?;
        Ok(())
    }

    /// One tile toward `(tx, ty)`, longest axis first, skipping blocked
    /// tiles.
    async fn step_towards(
        &self,
        instance: &mut EntityInstance,
        tx: i32,
        ty: i32,
    ) -> anyhow::Result<()> {
        let dx = tx - instance.x;
        let dy = ty - instance.y;
        if dx == 0 && dy == 0 {
            self.world.entities.update(instance).await?;
            return Ok(());
        }

        let mut candidates = Vec::with_capacity(2);
        let x_step = (instance.x + dx.signum(), instance.y);
        let y_step = (instance.x, instance.y + dy.signum());
        if dx.abs() >= dy.abs() {
            if dx != 0 {
                candidates.push(x_step);
            }
            if dy != 0 {
                candidates.push(y_step);
            }
        } else {
            candidates.push(y_step);
            if dx != 0 {
                candidates.push(x_step);
            }
        }

        for (nx, ny) in candidates {
            if self
                .world
                .maps
                .is_valid_move(&instance.map_id, instance.x, instance.y, nx, ny)
            {
                instance.x = nx;
                instance.y = ny;
                break;
            }
        }
        self.world.entities.update(instance).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tilefall_core::clock::ManualClock;

    use super::*;
    use crate::network::ConnectionRegistry;
    use crate::world::test_world;

    struct Fixture {
        ticker: EntityAiTicker,
        world: Arc<World>,
        clock: Arc<ManualClock>,
    }

    fn fixture(wander_chance: f64) -> Fixture {
        let (world, clock) = test_world();
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(EventBroadcaster::new(registry, Arc::clone(&world)));
        Fixture {
            ticker: EntityAiTicker::new(
                Arc::clone(&world),
                broadcaster,
                Duration::from_millis(200),
            )
            .with_wander_chance(wander_chance),
            world,
            clock,
        }
    }

    async fn online_player(world: &Arc<World>, id: i64, x: i32, y: i32) {
        world.players.register_online(id, &format!("p{id}")).await.unwrap();
        world
            .players
            .set_full_state(id, "samplemap", x, y, "down", 30, 30)
            .await
            .unwrap();
    }

    async fn spawn_goblin(world: &Arc<World>, x: i32, y: i32) -> EntityInstance {
        let def = world.reference.entity_by_name("GOBLIN").unwrap().clone();
        world
            .entities
            .spawn(&def, "samplemap", x, y, 1, 3, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn aggressive_entity_acquires_nearby_target() {
        let f = fixture(0.0);
        online_player(&f.world, 1, 12, 12).await;
        let goblin = spawn_goblin(&f.world, 10, 10).await;

        f.ticker.tick().await.unwrap();

        let instance = f.world.entities.get(goblin.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.state, EntityState::Walk);
        assert_eq!(instance.target_player_id, Some(1));
    }

    #[tokio::test]
    async fn entity_ignores_players_outside_aggro_radius() {
        let f = fixture(0.0);
        online_player(&f.world, 1, 40, 40).await;
        let goblin = spawn_goblin(&f.world, 10, 10).await;

        f.ticker.tick().await.unwrap();

        let instance = f.world.entities.get(goblin.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.state, EntityState::Idle);
        assert!(instance.target_player_id.is_none());
    }

    #[tokio::test]
    async fn walker_closes_distance_then_attacks() {
        let f = fixture(0.0);
        online_player(&f.world, 1, 14, 10).await;
        let goblin = spawn_goblin(&f.world, 10, 10).await;

        // Tick 1: acquire. Ticks 2..: step one tile per tick toward the
        // player, then flip to attack when adjacent.
        for _ in 0..8 {
            f.ticker.tick().await.unwrap();
        }
        let instance = f.world.entities.get(goblin.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.state, EntityState::Attack);
        assert!(chebyshev(instance.x, instance.y, 14, 10) <= 1);
    }

    #[tokio::test]
    async fn wander_stays_within_radius() {
        let f = fixture(1.0);
        let goblin = spawn_goblin(&f.world, 20, 20).await;

        for _ in 0..50 {
            f.ticker.tick().await.unwrap();
            let instance = f.world.entities.get(goblin.instance_id).await.unwrap().unwrap();
            assert!(
                chebyshev(instance.x, instance.y, 20, 20) <= 3,
                "wander escaped the radius"
            );
        }
    }

    #[tokio::test]
    async fn attack_respects_cooldown_and_damages_player() {
        let f = fixture(0.0);
        online_player(&f.world, 1, 11, 10).await;
        let goblin = spawn_goblin(&f.world, 10, 10).await;

        // Acquire, then reach attack state.
        f.ticker.tick().await.unwrap();
        f.ticker.tick().await.unwrap();

        let mut damaged = false;
        for _ in 0..40 {
            f.clock.advance(2.5); // past the attack cooldown each tick
            f.ticker.tick().await.unwrap();
            let hp = f.world.players.get_hp(1).await.unwrap().unwrap();
            if hp.current_hp < 30 {
                damaged = true;
                break;
            }
        }
        assert!(damaged, "goblin never landed a hit in 40 swings");
        let _ = goblin;
    }

    #[tokio::test]
    async fn dying_entities_hold_then_leave_the_world() {
        let f = fixture(0.0);
        let goblin = spawn_goblin(&f.world, 10, 10).await;
        f.world
            .entities
            .apply_damage(goblin.instance_id, 99)
            .await
            .unwrap();

        // Still in the dying hold window.
        f.ticker.tick().await.unwrap();
        assert!(f.world.entities.get(goblin.instance_id).await.unwrap().is_some());

        f.clock.advance(2.0);
        f.ticker.tick().await.unwrap();
        assert!(f.world.entities.get(goblin.instance_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn respawn_sweeper_revives_due_spawn_points() {
        let (world, clock) = test_world();
        // A map with a registered goblin spawn point.
        let mut maps = crate::maps::MapManager::new();
        let mut map = crate::maps::WorldMap::open_field("samplemap", 64, 64);
        map.spawn_points.push(crate::maps::SpawnPoint {
            id: 9,
            entity: "GOBLIN".to_string(),
            x: 12,
            y: 12,
            wander_radius: 3,
            aggro_override: None,
            disengage_override: None,
        });
        maps.insert(map);
        let world = crate::world::World::new(
            Arc::clone(&world.cache),
            Arc::clone(&world.store),
            Arc::clone(&world.clock),
            Arc::new(maps),
            world.settings.clone(),
            Some(42),
        );
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(EventBroadcaster::new(registry, Arc::clone(&world)));
        let ticker = EntityAiTicker::new(
            Arc::clone(&world),
            broadcaster,
            Duration::from_millis(200),
        )
        .with_wander_chance(0.0);

        world.entities.schedule_respawn("samplemap", 9, 1005.0).await.unwrap();

        ticker.tick().await.unwrap();
        assert!(world.entities.instances_on_map("samplemap").await.unwrap().is_empty());

        clock.advance(10.0);
        ticker.tick().await.unwrap();
        let instances = world.entities.instances_on_map("samplemap").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!((instances[0].x, instances[0].y), (12, 12));
        assert_eq!(instances[0].current_hp, instances[0].max_hp);
        assert_eq!(instances[0].spawn_point_id, 9);
    }
}
