//! Player state manager: online registry, position, HP, and combat state.
//!
//! The `player:{id}` hash is the authoritative copy of a player's mutable
//! vitals while they are online. All mutators write the cache and mark the
//! player dirty in the `positions` category (the player-row category);
//! nothing here writes the database inline.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use tilefall_core::clock::ClockSource;
use tilefall_core::types::{chebyshev, CombatTargetType};

use crate::cache::{keys, CacheEngine, DirtyCategory};
use crate::db::DurableStore;

// Hash fields of `player:{id}`.
const F_MAP: &str = "map_id";
const F_X: &str = "x";
const F_Y: &str = "y";
const F_FACING: &str = "facing";
const F_LAST_MOVE: &str = "last_move_time";
const F_CUR_HP: &str = "current_hp";
const F_MAX_HP: &str = "max_hp";
const F_CT_TYPE: &str = "combat_target_type";
const F_CT_ID: &str = "combat_target_id";
const F_CT_LAST: &str = "combat_last_attack_time";
const F_CT_SPEED: &str = "combat_attack_speed";

/// A player's position as stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub map_id: String,
    pub x: i32,
    pub y: i32,
    pub facing: String,
    pub last_move_time: f64,
}

/// A player's hitpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpState {
    pub current_hp: i32,
    pub max_hp: i32,
}

impl HpState {
    #[must_use]
    pub fn is_dead(self) -> bool {
        self.current_hp == 0
    }
}

/// Who a player is fighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatState {
    pub target_type: CombatTargetType,
    pub target_id: i64,
    pub last_attack_time: f64,
    pub attack_speed_secs: f64,
}

/// Result of an atomic HP decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    pub current_hp: i32,
    pub died: bool,
}

fn parse_i32(map: &HashMap<String, String>, field: &str) -> Option<i32> {
    map.get(field).and_then(|v| v.parse().ok())
}

fn parse_f64(map: &HashMap<String, String>, field: &str) -> Option<f64> {
    map.get(field).and_then(|v| v.parse().ok())
}

/// Façade over the cache for everything keyed on `player:{id}`.
pub struct PlayerStateManager {
    cache: Arc<dyn CacheEngine>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn ClockSource>,
}

impl PlayerStateManager {
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheEngine>,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            cache,
            store,
            clock,
        }
    }

    // --- Online registry ---

    /// Registers a player as online.
    ///
    /// Double registration is an invariant violation: the caller must tear
    /// down the offending session, so this fails loudly instead of
    /// overwriting.
    pub async fn register_online(&self, player_id: i64, username: &str) -> anyhow::Result<()> {
        let id_str = player_id.to_string();
        if self
            .cache
            .hget(keys::ONLINE_PLAYERS, &id_str)
            .await?
            .is_some()
        {
            bail!("player {player_id} is already registered online");
        }
        self.cache
            .hset(
                keys::ONLINE_PLAYERS,
                vec![(id_str.clone(), username.to_string())],
            )
            .await?;
        self.cache
            .hset(keys::ONLINE_USERNAMES, vec![(username.to_string(), id_str)])
            .await?;
        Ok(())
    }

    /// Unregisters a player, removing both directions of the mapping.
    pub async fn unregister_online(&self, player_id: i64) -> anyhow::Result<()> {
        let id_str = player_id.to_string();
        if let Some(username) = self.cache.hget(keys::ONLINE_PLAYERS, &id_str).await? {
            self.cache
                .hdel(keys::ONLINE_USERNAMES, &[username.as_str()])
                .await?;
        }
        self.cache.hdel(keys::ONLINE_PLAYERS, &[id_str.as_str()]).await?;
        Ok(())
    }

    pub async fn is_online(&self, player_id: i64) -> anyhow::Result<bool> {
        Ok(self
            .cache
            .hget(keys::ONLINE_PLAYERS, &player_id.to_string())
            .await?
            .is_some())
    }

    pub async fn username(&self, player_id: i64) -> anyhow::Result<Option<String>> {
        Ok(self
            .cache
            .hget(keys::ONLINE_PLAYERS, &player_id.to_string())
            .await?)
    }

    pub async fn id_for_username(&self, username: &str) -> anyhow::Result<Option<i64>> {
        Ok(self
            .cache
            .hget(keys::ONLINE_USERNAMES, username)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    /// Ids of every online player.
    pub async fn online_player_ids(&self) -> anyhow::Result<Vec<i64>> {
        let map = self.cache.hgetall(keys::ONLINE_PLAYERS).await?;
        Ok(map.keys().filter_map(|k| k.parse().ok()).collect())
    }

    // --- Position ---

    /// Reads a player's position, hydrating the cache from the durable
    /// store on a miss. `None` when the player exists in neither.
    pub async fn get_position(&self, player_id: i64) -> anyhow::Result<Option<PositionState>> {
        let map = self.cache.hgetall(&keys::player(player_id)).await?;
        if let Some(state) = Self::position_from_map(&map) {
            return Ok(Some(state));
        }
        self.hydrate(player_id).await?;
        let map = self.cache.hgetall(&keys::player(player_id)).await?;
        Ok(Self::position_from_map(&map))
    }

    fn position_from_map(map: &HashMap<String, String>) -> Option<PositionState> {
        Some(PositionState {
            map_id: map.get(F_MAP)?.clone(),
            x: parse_i32(map, F_X)?,
            y: parse_i32(map, F_Y)?,
            facing: map.get(F_FACING).cloned().unwrap_or_else(|| "down".to_string()),
            last_move_time: parse_f64(map, F_LAST_MOVE).unwrap_or(0.0),
        })
    }

    /// Writes a player's position and marks the player-row category dirty.
    ///
    /// When `update_move_time` is set, `last_move_time` advances to now and
    /// any combat state is cleared in the same atomic update (a successful
    /// step always breaks combat).
    pub async fn set_position(
        &self,
        player_id: i64,
        x: i32,
        y: i32,
        map_id: &str,
        facing: Option<&str>,
        update_move_time: bool,
    ) -> anyhow::Result<()> {
        let now = self.clock.now_secs();
        let map_id = map_id.to_string();
        let facing = facing.map(ToString::to_string);
        self.mark_dirty(player_id).await?;
        self.cache
            .update_hash(
                &keys::player(player_id),
                Box::new(move |map| {
                    map.insert(F_MAP.to_string(), map_id);
                    map.insert(F_X.to_string(), x.to_string());
                    map.insert(F_Y.to_string(), y.to_string());
                    if let Some(facing) = facing {
                        map.insert(F_FACING.to_string(), facing);
                    }
                    if update_move_time {
                        map.insert(F_LAST_MOVE.to_string(), now.to_string());
                        for field in [F_CT_TYPE, F_CT_ID, F_CT_LAST, F_CT_SPEED] {
                            map.remove(field);
                        }
                    }
                    true
                }),
            )
            .await?;
        Ok(())
    }

    // --- Hitpoints ---

    /// Reads a player's HP, hydrating on a cache miss.
    pub async fn get_hp(&self, player_id: i64) -> anyhow::Result<Option<HpState>> {
        let map = self.cache.hgetall(&keys::player(player_id)).await?;
        if let Some(hp) = Self::hp_from_map(&map) {
            return Ok(Some(hp));
        }
        self.hydrate(player_id).await?;
        let map = self.cache.hgetall(&keys::player(player_id)).await?;
        Ok(Self::hp_from_map(&map))
    }

    fn hp_from_map(map: &HashMap<String, String>) -> Option<HpState> {
        Some(HpState {
            current_hp: parse_i32(map, F_CUR_HP)?,
            max_hp: parse_i32(map, F_MAX_HP)?,
        })
    }

    /// Writes HP, clamping `0 <= current <= max`.
    pub async fn set_hp(&self, player_id: i64, current_hp: i32, max_hp: i32) -> anyhow::Result<()> {
        let max_hp = max_hp.max(1);
        let current_hp = current_hp.clamp(0, max_hp);
        self.mark_dirty(player_id).await?;
        self.cache
            .hset(
                &keys::player(player_id),
                vec![
                    (F_CUR_HP.to_string(), current_hp.to_string()),
                    (F_MAX_HP.to_string(), max_hp.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Atomically decrements HP by `damage` (clamped at 0).
    ///
    /// When the decrement reaches 0, the combat-state fields are removed in
    /// the same per-key update, so no reader can ever observe a dead player
    /// still flagged as in combat.
    pub async fn apply_damage(
        &self,
        player_id: i64,
        damage: i32,
    ) -> anyhow::Result<DamageOutcome> {
        let cell = Arc::new(parking_lot::Mutex::new(None::<DamageOutcome>));
        let out = Arc::clone(&cell);
        self.mark_dirty(player_id).await?;
        let applied = self
            .cache
            .update_hash(
                &keys::player(player_id),
                Box::new(move |map| {
                    let Some(current) = parse_i32(map, F_CUR_HP) else {
                        return false;
                    };
                    let new_hp = (current - damage.max(0)).max(0);
                    map.insert(F_CUR_HP.to_string(), new_hp.to_string());
                    let died = new_hp == 0;
                    if died {
                        for field in [F_CT_TYPE, F_CT_ID, F_CT_LAST, F_CT_SPEED] {
                            map.remove(field);
                        }
                    }
                    *out.lock() = Some(DamageOutcome {
                        current_hp: new_hp,
                        died,
                    });
                    true
                }),
            )
            .await?;
        if !applied {
            bail!("player {player_id} has no HP state in cache");
        }
        let outcome = cell.lock().take().context("damage outcome missing")?;
        Ok(outcome)
    }

    /// Atomically increments HP by `amount`, capped at max.
    pub async fn apply_heal(&self, player_id: i64, amount: i32) -> anyhow::Result<i32> {
        let cell = Arc::new(parking_lot::Mutex::new(0));
        let out = Arc::clone(&cell);
        self.mark_dirty(player_id).await?;
        let applied = self
            .cache
            .update_hash(
                &keys::player(player_id),
                Box::new(move |map| {
                    let (Some(current), Some(max)) =
                        (parse_i32(map, F_CUR_HP), parse_i32(map, F_MAX_HP))
                    else {
                        return false;
                    };
                    let new_hp = (current + amount.max(0)).min(max);
                    map.insert(F_CUR_HP.to_string(), new_hp.to_string());
                    *out.lock() = new_hp;
                    true
                }),
            )
            .await?;
        if !applied {
            bail!("player {player_id} has no HP state in cache");
        }
        let new_hp = *cell.lock();
        Ok(new_hp)
    }

    // --- Combat state ---

    pub async fn get_combat_state(&self, player_id: i64) -> anyhow::Result<Option<CombatState>> {
        let map = self.cache.hgetall(&keys::player(player_id)).await?;
        let target_type = match map.get(F_CT_TYPE).map(String::as_str) {
            Some("entity") => CombatTargetType::Entity,
            Some("player") => CombatTargetType::Player,
            _ => return Ok(None),
        };
        Ok(Some(CombatState {
            target_type,
            target_id: map
                .get(F_CT_ID)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0),
            last_attack_time: parse_f64(&map, F_CT_LAST).unwrap_or(0.0),
            attack_speed_secs: parse_f64(&map, F_CT_SPEED).unwrap_or(0.0),
        }))
    }

    pub async fn set_combat_state(&self, player_id: i64, state: CombatState) -> anyhow::Result<()> {
        let target_type = match state.target_type {
            CombatTargetType::Entity => "entity",
            CombatTargetType::Player => "player",
        };
        self.cache
            .hset(
                &keys::player(player_id),
                vec![
                    (F_CT_TYPE.to_string(), target_type.to_string()),
                    (F_CT_ID.to_string(), state.target_id.to_string()),
                    (F_CT_LAST.to_string(), state.last_attack_time.to_string()),
                    (F_CT_SPEED.to_string(), state.attack_speed_secs.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn clear_combat_state(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .hdel(
                &keys::player(player_id),
                &[F_CT_TYPE, F_CT_ID, F_CT_LAST, F_CT_SPEED],
            )
            .await?;
        Ok(())
    }

    // --- Whole-state helpers ---

    /// Writes position and HP in one update (login hydration and tests).
    pub async fn set_full_state(
        &self,
        player_id: i64,
        map_id: &str,
        x: i32,
        y: i32,
        facing: &str,
        current_hp: i32,
        max_hp: i32,
    ) -> anyhow::Result<()> {
        self.mark_dirty(player_id).await?;
        self.cache
            .hset(
                &keys::player(player_id),
                vec![
                    (F_MAP.to_string(), map_id.to_string()),
                    (F_X.to_string(), x.to_string()),
                    (F_Y.to_string(), y.to_string()),
                    (F_FACING.to_string(), facing.to_string()),
                    (F_CUR_HP.to_string(), current_hp.to_string()),
                    (F_MAX_HP.to_string(), max_hp.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Drops a player's hot state from the cache (after logout sync).
    pub async fn clear(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache.del(&keys::player(player_id)).await?;
        Ok(())
    }

    /// Online players on `map_id` within `radius` (Chebyshev) of a point.
    ///
    /// Reads only the cache: players whose position has not been hydrated
    /// yet are simply not nearby.
    pub async fn nearby_player_ids(
        &self,
        map_id: &str,
        x: i32,
        y: i32,
        radius: i32,
        exclude: Option<i64>,
    ) -> anyhow::Result<Vec<i64>> {
        let mut nearby = Vec::new();
        for player_id in self.online_player_ids().await? {
            if exclude == Some(player_id) {
                continue;
            }
            let map = self.cache.hgetall(&keys::player(player_id)).await?;
            let Some(state) = Self::position_from_map(&map) else {
                continue;
            };
            if state.map_id == map_id && chebyshev(state.x, state.y, x, y) <= radius {
                nearby.push(player_id);
            }
        }
        nearby.sort_unstable();
        Ok(nearby)
    }

    /// Loads the player row from the durable store into the cache.
    async fn hydrate(&self, player_id: i64) -> anyhow::Result<()> {
        if let Some(row) = self.store.load_player(player_id).await? {
            self.cache
                .hset(
                    &keys::player(player_id),
                    vec![
                        (F_MAP.to_string(), row.map_id),
                        (F_X.to_string(), row.x.to_string()),
                        (F_Y.to_string(), row.y.to_string()),
                        (F_FACING.to_string(), row.facing),
                        (F_CUR_HP.to_string(), row.current_hp.to_string()),
                        (F_MAX_HP.to_string(), row.max_hp.to_string()),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Marks the player-row category dirty. Called before the mutation it
    /// covers: a task cancelled mid-write leaves at worst a spurious flag,
    /// never an unflagged change.
    async fn mark_dirty(&self, player_id: i64) -> anyhow::Result<()> {
        self.cache
            .sadd(DirtyCategory::Positions.key(), &player_id.to_string())
            .await?;
        Ok(())
    }
}
