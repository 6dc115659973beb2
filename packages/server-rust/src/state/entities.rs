//! Entity instance manager: ephemeral monsters and NPCs.
//!
//! Instances live only in the cache (`entity_instance:{id}` plus a per-map
//! set); death re-queues the spawn point in the respawn sorted set scored
//! by due time. Nothing here is persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tilefall_core::clock::ClockSource;
use tilefall_core::defs::EntityDef;
use tilefall_core::messages::EntityDelta;
use tilefall_core::types::EntityState;

use crate::cache::{keys, CacheEngine};

const F_DATA: &str = "data";

/// One spawned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    pub instance_id: i64,
    /// Entity definition id.
    pub entity_id: u32,
    pub name: String,
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub current_hp: i32,
    pub max_hp: i32,
    pub state: EntityState,
    pub spawn_x: i32,
    pub spawn_y: i32,
    pub wander_radius: i32,
    pub spawn_point_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_player_id: Option<i64>,
    pub spawned_at: f64,
    pub respawn_delay_secs: u32,
    /// Last time this entity attacked (AI cooldown).
    #[serde(default)]
    pub last_attack_time: f64,
    /// When the entity entered the `dying` state.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dying_at: Option<f64>,
}

impl EntityInstance {
    #[must_use]
    pub fn is_dead(&self) -> bool {
        !self.state.is_live()
    }

    /// Client view of this instance.
    #[must_use]
    pub fn delta(&self) -> EntityDelta {
        EntityDelta {
            instance_id: self.instance_id,
            entity_id: self.entity_id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            current_hp: self.current_hp,
            max_hp: self.max_hp,
            state: self.state,
        }
    }
}

/// Result of an atomic entity HP decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDamageOutcome {
    pub current_hp: i32,
    pub died: bool,
}

/// A due respawn: which spawn point on which map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRespawn {
    pub map_id: String,
    pub spawn_point_id: i64,
}

fn respawn_member(map_id: &str, spawn_point_id: i64) -> String {
    format!("{map_id}|{spawn_point_id}")
}

/// Façade over the cache for entity instances.
pub struct EntityManager {
    cache: Arc<dyn CacheEngine>,
    clock: Arc<dyn ClockSource>,
}

impl EntityManager {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheEngine>, clock: Arc<dyn ClockSource>) -> Self {
        Self { cache, clock }
    }

    /// Spawns a new instance of `def` at `(x, y)`.
    pub async fn spawn(
        &self,
        def: &EntityDef,
        map_id: &str,
        x: i32,
        y: i32,
        spawn_point_id: i64,
        wander_radius: i32,
        current_hp: Option<i32>,
    ) -> anyhow::Result<EntityInstance> {
        let instance_id = self.cache.incr(keys::ENTITY_INSTANCE_SEQ).await?;
        let instance = EntityInstance {
            instance_id,
            entity_id: def.id,
            name: def.name.clone(),
            map_id: map_id.to_string(),
            x,
            y,
            current_hp: current_hp.unwrap_or(def.max_hp).clamp(0, def.max_hp),
            max_hp: def.max_hp,
            state: EntityState::Idle,
            spawn_x: x,
            spawn_y: y,
            wander_radius,
            spawn_point_id,
            target_player_id: None,
            spawned_at: self.clock.now_secs(),
            respawn_delay_secs: def.respawn_time_secs,
            last_attack_time: 0.0,
            dying_at: None,
        };
        self.update(&instance).await?;
        self.cache
            .sadd(&keys::entities_by_map(map_id), &instance_id.to_string())
            .await?;
        Ok(instance)
    }

    /// Reads one instance.
    pub async fn get(&self, instance_id: i64) -> anyhow::Result<Option<EntityInstance>> {
        let raw = self
            .cache
            .hget(&keys::entity_instance(instance_id), F_DATA)
            .await?;
        Ok(raw.and_then(|v| serde_json::from_str(&v).ok()))
    }

    /// Writes an instance's full record.
    pub async fn update(&self, instance: &EntityInstance) -> anyhow::Result<()> {
        self.cache
            .hset(
                &keys::entity_instance(instance.instance_id),
                vec![(F_DATA.to_string(), serde_json::to_string(instance)?)],
            )
            .await?;
        Ok(())
    }

    /// All instances on a map, ordered by id.
    pub async fn instances_on_map(&self, map_id: &str) -> anyhow::Result<Vec<EntityInstance>> {
        let ids = self.cache.smembers(&keys::entities_by_map(map_id)).await?;
        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(instance_id) = id.parse::<i64>() {
                if let Some(instance) = self.get(instance_id).await? {
                    instances.push(instance);
                }
            }
        }
        instances.sort_unstable_by_key(|i| i.instance_id);
        Ok(instances)
    }

    /// Atomically decrements an instance's HP.
    ///
    /// Reaching 0 transitions the instance to `dying` and drops its target
    /// in the same per-key update. `None` when the instance is unknown.
    pub async fn apply_damage(
        &self,
        instance_id: i64,
        damage: i32,
    ) -> anyhow::Result<Option<EntityDamageOutcome>> {
        let now = self.clock.now_secs();
        let cell = Arc::new(parking_lot::Mutex::new(None::<EntityDamageOutcome>));
        let out = Arc::clone(&cell);
        self.cache
            .update_hash(
                &keys::entity_instance(instance_id),
                Box::new(move |map| {
                    let Some(mut instance): Option<EntityInstance> =
                        map.get(F_DATA).and_then(|v| serde_json::from_str(v).ok())
                    else {
                        return false;
                    };
                    instance.current_hp = (instance.current_hp - damage.max(0)).max(0);
                    let died = instance.current_hp == 0;
                    if died {
                        instance.state = EntityState::Dying;
                        instance.dying_at = Some(now);
                        instance.target_player_id = None;
                    }
                    *out.lock() = Some(EntityDamageOutcome {
                        current_hp: instance.current_hp,
                        died,
                    });
                    map.insert(
                        F_DATA.to_string(),
                        serde_json::to_string(&instance).unwrap_or_default(),
                    );
                    true
                }),
            )
            .await?;
        let outcome = *cell.lock();
        Ok(outcome)
    }

    /// Removes an instance from the world.
    pub async fn remove(&self, instance: &EntityInstance) -> anyhow::Result<()> {
        self.cache
            .del(&keys::entity_instance(instance.instance_id))
            .await?;
        self.cache
            .srem(
                &keys::entities_by_map(&instance.map_id),
                &instance.instance_id.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Queues a spawn point for respawn at `when`.
    pub async fn schedule_respawn(
        &self,
        map_id: &str,
        spawn_point_id: i64,
        when: f64,
    ) -> anyhow::Result<()> {
        self.cache
            .zadd(
                keys::ENTITY_RESPAWN_QUEUE,
                &respawn_member(map_id, spawn_point_id),
                when,
            )
            .await?;
        Ok(())
    }

    /// Dequeues every spawn point due by `now`.
    pub async fn due_respawns(&self, now: f64) -> anyhow::Result<Vec<DueRespawn>> {
        let due = self
            .cache
            .zrangebyscore(keys::ENTITY_RESPAWN_QUEUE, f64::MIN, now)
            .await?;
        let mut respawns = Vec::with_capacity(due.len());
        for (member, _) in due {
            self.cache.zrem(keys::ENTITY_RESPAWN_QUEUE, &member).await?;
            if let Some((map_id, sp)) = member.rsplit_once('|') {
                if let Ok(spawn_point_id) = sp.parse() {
                    respawns.push(DueRespawn {
                        map_id: map_id.to_string(),
                        spawn_point_id,
                    });
                }
            }
        }
        Ok(respawns)
    }
}
