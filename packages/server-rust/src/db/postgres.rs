//! PostgreSQL [`DurableStore`] implementation.
//!
//! Schema management (migrations) is external; this module assumes the
//! tables described in the persisted-state layout exist. All sync writes
//! are idempotent upserts keyed on their natural primary key, so flushing
//! the same snapshot twice leaves the store unchanged.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::rows::{
    EquipmentRow, GroundItemRow, InventoryRow, PlayerRow, PlayerStateUpdate, SkillRow,
};
use super::store::DurableStore;

/// Durable store backed by a PostgreSQL connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (used by tooling and tests with a live DB).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgStore {
    async fn load_player(&self, player_id: i64) -> anyhow::Result<Option<PlayerRow>> {
        let row = sqlx::query_as::<_, PlayerRow>(
            "SELECT id, username, map_id, x, y, facing, current_hp, max_hp, \
             is_banned, timeout_until \
             FROM players WHERE id = $1",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn load_inventory(&self, player_id: i64) -> anyhow::Result<Vec<InventoryRow>> {
        let rows = sqlx::query_as::<_, InventoryRow>(
            "SELECT player_id, slot, item_id, quantity, current_durability \
             FROM player_inventory WHERE player_id = $1 ORDER BY slot",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_equipment(&self, player_id: i64) -> anyhow::Result<Vec<EquipmentRow>> {
        let rows = sqlx::query_as::<_, EquipmentRow>(
            "SELECT player_id, equipment_slot, item_id, quantity, current_durability \
             FROM player_equipment WHERE player_id = $1",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_skills(&self, player_id: i64) -> anyhow::Result<Vec<SkillRow>> {
        let rows = sqlx::query_as::<_, SkillRow>(
            "SELECT ps.player_id, s.name AS skill, ps.current_level, ps.experience \
             FROM player_skills ps JOIN skills s ON s.id = ps.skill_id \
             WHERE ps.player_id = $1",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_active_ground_items(&self, now: f64) -> anyhow::Result<Vec<GroundItemRow>> {
        let rows = sqlx::query_as::<_, GroundItemRow>(
            "SELECT id, item_id, map_id, x, y, quantity, current_durability, \
             dropped_by, dropped_at, public_at, despawn_at \
             FROM ground_items WHERE despawn_at > $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save_player_state(&self, update: &PlayerStateUpdate) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE players SET map_id = $2, x = $3, y = $4, facing = $5, \
             current_hp = $6, max_hp = $7 WHERE id = $1",
        )
        .bind(update.player_id)
        .bind(&update.map_id)
        .bind(update.x)
        .bind(update.y)
        .bind(&update.facing)
        .bind(update.current_hp)
        .bind(update.max_hp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_inventory(
        &self,
        player_id: i64,
        rows: &[InventoryRow],
    ) -> anyhow::Result<()> {
        // Snapshot replace: delete-then-insert inside one transaction so
        // readers never observe a partially flushed inventory.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM player_inventory WHERE player_id = $1")
            .bind(player_id)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO player_inventory \
                 (player_id, slot, item_id, quantity, current_durability) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.player_id)
            .bind(row.slot)
            .bind(row.item_id)
            .bind(row.quantity)
            .bind(row.current_durability)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_equipment(
        &self,
        player_id: i64,
        rows: &[EquipmentRow],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM player_equipment WHERE player_id = $1")
            .bind(player_id)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO player_equipment \
                 (player_id, equipment_slot, item_id, quantity, current_durability) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.player_id)
            .bind(&row.equipment_slot)
            .bind(row.item_id)
            .bind(row.quantity)
            .bind(row.current_durability)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_skills(&self, _player_id: i64, rows: &[SkillRow]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO player_skills (player_id, skill_id, current_level, experience) \
                 SELECT $1, s.id, $3, $4 FROM skills s WHERE s.name = $2 \
                 ON CONFLICT (player_id, skill_id) DO UPDATE \
                 SET current_level = EXCLUDED.current_level, \
                     experience = EXCLUDED.experience",
            )
            .bind(row.player_id)
            .bind(&row.skill)
            .bind(row.current_level)
            .bind(row.experience)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_ground_item(&self, row: &GroundItemRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO ground_items \
             (id, item_id, map_id, x, y, quantity, current_durability, \
              dropped_by, dropped_at, public_at, despawn_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE \
             SET quantity = EXCLUDED.quantity, \
                 current_durability = EXCLUDED.current_durability, \
                 public_at = EXCLUDED.public_at, \
                 despawn_at = EXCLUDED.despawn_at",
        )
        .bind(row.id)
        .bind(row.item_id)
        .bind(&row.map_id)
        .bind(row.x)
        .bind(row.y)
        .bind(row.quantity)
        .bind(row.current_durability)
        .bind(row.dropped_by)
        .bind(row.dropped_at)
        .bind(row.public_at)
        .bind(row.despawn_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_ground_item(&self, ground_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM ground_items WHERE id = $1")
            .bind(ground_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
