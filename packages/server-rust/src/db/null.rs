//! No-op [`DurableStore`] for tests and cache-only operation.
//!
//! Reads return "nothing persisted"; writes succeed and discard. Managers
//! running on top of it behave exactly like the real thing minus
//! durability, which is what unit and WebSocket tests want.

use async_trait::async_trait;

use super::rows::{
    EquipmentRow, GroundItemRow, InventoryRow, PlayerRow, PlayerStateUpdate, SkillRow,
};
use super::store::DurableStore;

/// Discards all writes, loads nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

#[async_trait]
impl DurableStore for NullStore {
    async fn load_player(&self, _player_id: i64) -> anyhow::Result<Option<PlayerRow>> {
        Ok(None)
    }

    async fn load_inventory(&self, _player_id: i64) -> anyhow::Result<Vec<InventoryRow>> {
        Ok(Vec::new())
    }

    async fn load_equipment(&self, _player_id: i64) -> anyhow::Result<Vec<EquipmentRow>> {
        Ok(Vec::new())
    }

    async fn load_skills(&self, _player_id: i64) -> anyhow::Result<Vec<SkillRow>> {
        Ok(Vec::new())
    }

    async fn load_active_ground_items(&self, _now: f64) -> anyhow::Result<Vec<GroundItemRow>> {
        Ok(Vec::new())
    }

    async fn save_player_state(&self, _update: &PlayerStateUpdate) -> anyhow::Result<()> {
        Ok(())
    }

    async fn replace_inventory(
        &self,
        _player_id: i64,
        _rows: &[InventoryRow],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn replace_equipment(
        &self,
        _player_id: i64,
        _rows: &[EquipmentRow],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_skills(&self, _player_id: i64, _rows: &[SkillRow]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_ground_item(&self, _row: &GroundItemRow) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_ground_item(&self, _ground_id: i64) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_are_empty_and_writes_succeed() {
        let store = NullStore;
        assert!(store.load_player(1).await.unwrap().is_none());
        assert!(store.load_inventory(1).await.unwrap().is_empty());
        assert!(store.load_active_ground_items(0.0).await.unwrap().is_empty());
        store
            .save_player_state(&PlayerStateUpdate {
                player_id: 1,
                map_id: "samplemap".to_string(),
                x: 0,
                y: 0,
                facing: "down".to_string(),
                current_hp: 100,
                max_hp: 100,
            })
            .await
            .unwrap();
        store.delete_ground_item(42).await.unwrap();
    }
}
