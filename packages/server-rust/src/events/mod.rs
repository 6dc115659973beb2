//! Event broadcaster: turns state mutations into `event_*` envelopes and
//! fans them out through the connection registry.
//!
//! Delivery is best-effort per session (`try_send`); a slow session drops
//! events and reconciles through the periodic state update. Order per
//! session is the outbound channel's FIFO.

use std::sync::Arc;

use serde::Serialize;
use tilefall_core::constants::CHUNK_SIZE;
use tilefall_core::messages::{
    msg, ChatMessagePayload, Envelope, EquipmentUpdatePayload, EquipmentView, GameConfig,
    GroundItemDespawnPayload, GroundItemSpawnPayload, InventorySlotView, InventoryUpdatePayload,
    PlayerDelta, PlayerDiedPayload, PlayerDisconnectPayload, PlayerInfo, PlayerRespawnPayload,
    ServerShutdownPayload, SkillUpdatePayload, SkillView, StateUpdatePayload, WelcomePayload,
};
use tilefall_core::types::{chebyshev, Position};
use uuid::Uuid;

use crate::network::{ConnectionHandle, ConnectionRegistry};
use crate::service::{PlayerDeathOutcome, ServiceError, ServiceResult};
use crate::state::{GroundItem, XpAward};
use crate::world::World;

/// Builds and delivers server-pushed events.
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
    world: Arc<World>,
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, world: Arc<World>) -> Self {
        Self { registry, world }
    }

    /// Builds an event envelope with a fresh id.
    fn event<T: Serialize>(kind: &str, payload: &T) -> Option<Envelope> {
        match Envelope::with_payload(Uuid::new_v4().to_string(), kind, payload) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                tracing::error!(%err, kind, "failed to build event envelope");
                None
            }
        }
    }

    fn send(handle: &ConnectionHandle, kind: &str, payload: &impl Serialize) {
        if let Some(envelope) = Self::event(kind, payload) {
            let _ = handle.try_send_envelope(&envelope);
        }
    }

    /// Sends `event_welcome` to a freshly authenticated session.
    pub async fn send_welcome(
        &self,
        handle: &ConnectionHandle,
        player_id: i64,
        username: &str,
    ) -> ServiceResult<()> {
        let position = self
            .world
            .players
            .get_position(player_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| {
                ServiceError::new(
                    crate::service::ErrorCode::Internal,
                    "player has no position after login",
                )
            })?;
        let hp = self
            .world
            .players
            .get_hp(player_id)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| {
                ServiceError::new(
                    crate::service::ErrorCode::Internal,
                    "player has no HP after login",
                )
            })?;

        let skills = self
            .world
            .skills
            .get_all_skills(player_id)
            .await
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|(skill, record)| SkillView {
                skill,
                level: record.level,
                experience: record.experience,
            })
            .collect();
        let inventory = self.inventory_views(player_id).await?;
        let equipment = self.equipment_views(player_id).await?;

        let payload = WelcomePayload {
            player: PlayerInfo {
                id: player_id,
                username: username.to_string(),
                position: Position::new(position.map_id, position.x, position.y),
                facing: position.facing,
                current_hp: hp.current_hp,
                max_hp: hp.max_hp,
            },
            config: GameConfig {
                chunk_size: CHUNK_SIZE,
                movement_cooldown_secs: self.world.settings.movement_cooldown_secs,
            },
            skills,
            inventory,
            equipment,
        };
        Self::send(handle, msg::EVENT_WELCOME, &payload);
        Ok(())
    }

    /// Sends a joining player every ground item they may currently see on
    /// their map, one spawn event each.
    pub async fn send_visible_ground_items(
        &self,
        handle: &ConnectionHandle,
        player_id: i64,
        map_id: &str,
    ) -> ServiceResult<()> {
        for item in self
            .world
            .ground_items
            .visible_on_map(map_id, player_id)
            .await
            .map_err(ServiceError::from)?
        {
            Self::send(
                handle,
                msg::EVENT_GROUND_ITEM_SPAWN,
                &GroundItemSpawnPayload {
                    ground_item: item.view(),
                },
            );
        }
        Ok(())
    }

    /// Per-tick state deltas: each session gets the players and entities
    /// within the update radius of its own position.
    pub async fn broadcast_state_updates(&self) -> ServiceResult<()> {
        let radius = self.world.settings.state_update_radius;
        for map in self.world.maps.iter() {
            let sessions = self.registry.connections_on_map(&map.id);
            if sessions.is_empty() {
                continue;
            }

            // One map-wide snapshot, filtered per session below.
            let mut players = Vec::new();
            for player_id in self
                .world
                .players
                .online_player_ids()
                .await
                .map_err(ServiceError::from)?
            {
                let Some(position) = self
                    .world
                    .players
                    .get_position(player_id)
                    .await
                    .map_err(ServiceError::from)?
                else {
                    continue;
                };
                if position.map_id != map.id {
                    continue;
                }
                let Some(hp) = self
                    .world
                    .players
                    .get_hp(player_id)
                    .await
                    .map_err(ServiceError::from)?
                else {
                    continue;
                };
                let username = self
                    .world
                    .players
                    .username(player_id)
                    .await
                    .map_err(ServiceError::from)?
                    .unwrap_or_default();
                players.push(PlayerDelta {
                    id: player_id,
                    username,
                    x: position.x,
                    y: position.y,
                    facing: position.facing,
                    current_hp: hp.current_hp,
                    max_hp: hp.max_hp,
                });
            }
            let entities: Vec<_> = self
                .world
                .entities
                .instances_on_map(&map.id)
                .await
                .map_err(ServiceError::from)?
                .iter()
                .map(crate::state::EntityInstance::delta)
                .collect();

            for handle in sessions {
                let Some(session_player) = handle.player_id() else {
                    continue;
                };
                let Some(center) = players.iter().find(|p| p.id == session_player) else {
                    continue;
                };
                let (cx, cy) = (center.x, center.y);
                let payload = StateUpdatePayload {
                    players: players
                        .iter()
                        .filter(|p| chebyshev(p.x, p.y, cx, cy) <= radius)
                        .cloned()
                        .collect(),
                    entities: entities
                        .iter()
                        .filter(|e| chebyshev(e.x, e.y, cx, cy) <= radius)
                        .cloned()
                        .collect(),
                };
                Self::send(&handle, msg::EVENT_STATE_UPDATE, &payload);
            }
        }
        Ok(())
    }

    /// Announces a player's death and respawn to their map.
    pub fn player_died(&self, outcome: &PlayerDeathOutcome) {
        if let Some(envelope) = Self::event(
            msg::EVENT_PLAYER_DIED,
            &PlayerDiedPayload {
                player_id: outcome.player_id,
                position: outcome.died_at.clone(),
            },
        ) {
            self.registry
                .fanout(&outcome.died_at.map_id, |s| s.authenticated, &envelope);
        }
        if let Some(envelope) = Self::event(
            msg::EVENT_PLAYER_RESPAWN,
            &PlayerRespawnPayload {
                player_id: outcome.player_id,
                position: outcome.respawn_position.clone(),
                current_hp: outcome.max_hp,
                max_hp: outcome.max_hp,
            },
        ) {
            self.registry.fanout(
                &outcome.respawn_position.map_id,
                |s| s.authenticated,
                &envelope,
            );
        }
        // The death pile is private: only the owner learns about it now.
        for item in &outcome.dropped_items {
            self.ground_item_spawned(item);
        }
    }

    /// Announces a new ground item to whoever may see it: the owner during
    /// the privacy window, the whole map otherwise.
    pub fn ground_item_spawned(&self, item: &GroundItem) {
        let Some(envelope) = Self::event(
            msg::EVENT_GROUND_ITEM_SPAWN,
            &GroundItemSpawnPayload { ground_item: item.view() },
        ) else {
            return;
        };
        match (item.public_announced, item.dropped_by) {
            (false, Some(owner)) => {
                self.registry
                    .fanout(&item.map_id, move |s| s.player_id == Some(owner), &envelope);
            }
            _ => self.registry.fanout(&item.map_id, |s| s.authenticated, &envelope),
        }
    }

    /// Reveals a formerly private item to the rest of its map.
    pub fn ground_item_went_public(&self, item: &GroundItem) {
        let Some(envelope) = Self::event(
            msg::EVENT_GROUND_ITEM_SPAWN,
            &GroundItemSpawnPayload { ground_item: item.view() },
        ) else {
            return;
        };
        let owner = item.dropped_by;
        self.registry
            .fanout(&item.map_id, move |s| s.player_id != owner, &envelope);
    }

    /// Announces a removed ground item (despawn or pickup) to its map.
    pub fn ground_item_despawned(&self, item: &GroundItem) {
        if let Some(envelope) = Self::event(
            msg::EVENT_GROUND_ITEM_DESPAWN,
            &GroundItemDespawnPayload { ground_id: item.id },
        ) {
            self.registry.fanout(&item.map_id, |s| s.authenticated, &envelope);
        }
    }

    /// Sends a player their full inventory after a mutation.
    pub async fn inventory_update(&self, player_id: i64) -> ServiceResult<()> {
        let Some(handle) = self.registry.find_by_player(player_id) else {
            return Ok(());
        };
        let slots = self.inventory_views(player_id).await?;
        Self::send(&handle, msg::EVENT_INVENTORY_UPDATE, &InventoryUpdatePayload { slots });
        Ok(())
    }

    /// Sends a player their full equipment after a mutation.
    pub async fn equipment_update(&self, player_id: i64) -> ServiceResult<()> {
        let Some(handle) = self.registry.find_by_player(player_id) else {
            return Ok(());
        };
        let slots = self.equipment_views(player_id).await?;
        Self::send(&handle, msg::EVENT_EQUIPMENT_UPDATE, &EquipmentUpdatePayload { slots });
        Ok(())
    }

    /// Sends a player one skill's new level and experience.
    pub fn skill_update(&self, player_id: i64, award: &XpAward) {
        let Some(handle) = self.registry.find_by_player(player_id) else {
            return;
        };
        Self::send(
            &handle,
            msg::EVENT_SKILL_UPDATE,
            &SkillUpdatePayload {
                skill: award.skill,
                previous_level: award.previous_level,
                current_level: award.current_level,
                experience: award.experience,
                leveled_up: award.leveled_up,
            },
        );
    }

    /// Routes a chat message to its channel: `global` (everyone), `local`
    /// (same map within the update radius), or `dm:<username>`.
    pub async fn chat_message(
        &self,
        from_player: i64,
        from_username: &str,
        channel: &str,
        text: &str,
    ) -> ServiceResult<()> {
        let payload = ChatMessagePayload {
            channel: channel.to_string(),
            from: from_username.to_string(),
            text: text.to_string(),
            timestamp: self.world.clock.now_secs(),
        };
        let Some(envelope) = Self::event(msg::EVENT_CHAT_MESSAGE, &payload) else {
            return Ok(());
        };

        if channel == "global" {
            self.registry.broadcast_all(&envelope);
            return Ok(());
        }
        if let Some(target) = channel.strip_prefix("dm:") {
            let target_id = self
                .world
                .players
                .id_for_username(target)
                .await
                .map_err(ServiceError::from)?;
            if let Some(handle) = target_id.and_then(|id| self.registry.find_by_player(id)) {
                let _ = handle.try_send_envelope(&envelope);
            }
            // Echo to the sender so their log shows the message.
            if let Some(handle) = self.registry.find_by_player(from_player) {
                let _ = handle.try_send_envelope(&envelope);
            }
            return Ok(());
        }

        // local: same map, within the state-update radius of the sender.
        let Some(position) = self
            .world
            .players
            .get_position(from_player)
            .await
            .map_err(ServiceError::from)?
        else {
            return Ok(());
        };
        let radius = self.world.settings.state_update_radius;
        let nearby = self
            .world
            .players
            .nearby_player_ids(&position.map_id, position.x, position.y, radius, None)
            .await
            .map_err(ServiceError::from)?;
        self.registry.fanout(
            &position.map_id,
            move |s| s.player_id.is_some_and(|id| nearby.contains(&id)),
            &envelope,
        );
        Ok(())
    }

    /// Announces a disconnect to the player's map.
    pub fn player_disconnected(&self, map_id: &str, player_id: i64, username: &str) {
        if let Some(envelope) = Self::event(
            msg::EVENT_PLAYER_DISCONNECT,
            &PlayerDisconnectPayload {
                player_id,
                username: username.to_string(),
            },
        ) {
            self.registry.fanout(map_id, |s| s.authenticated, &envelope);
        }
    }

    /// Tells every session the server is going down.
    pub fn server_shutdown(&self, message: &str) {
        if let Some(envelope) = Self::event(
            msg::EVENT_SERVER_SHUTDOWN,
            &ServerShutdownPayload {
                message: message.to_string(),
            },
        ) {
            self.registry.broadcast_all(&envelope);
        }
    }

    async fn inventory_views(&self, player_id: i64) -> ServiceResult<Vec<InventorySlotView>> {
        Ok(self
            .world
            .inventories
            .get_inventory(player_id)
            .await
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|(slot, record)| InventorySlotView {
                slot,
                item_id: record.item_id,
                quantity: record.quantity,
                current_durability: record.current_durability,
            })
            .collect())
    }

    async fn equipment_views(&self, player_id: i64) -> ServiceResult<Vec<EquipmentView>> {
        Ok(self
            .world
            .equipment
            .get_equipment(player_id)
            .await
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|(slot, record)| EquipmentView {
                slot,
                item_id: record.item_id,
                quantity: record.quantity,
                current_durability: record.current_durability,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use tilefall_core::messages::msg;

    use super::*;
    use crate::network::{ConnectionConfig, OutboundMessage};
    use crate::world::test_world;

    struct Fixture {
        broadcaster: EventBroadcaster,
        registry: Arc<ConnectionRegistry>,
        world: Arc<World>,
    }

    fn fixture() -> Fixture {
        let (world, _) = test_world();
        let registry = Arc::new(ConnectionRegistry::new());
        Fixture {
            broadcaster: EventBroadcaster::new(Arc::clone(&registry), Arc::clone(&world)),
            registry,
            world,
        }
    }

    async fn connect_player(
        f: &Fixture,
        player_id: i64,
        username: &str,
        x: i32,
        y: i32,
    ) -> (Arc<ConnectionHandle>, tokio::sync::mpsc::Receiver<OutboundMessage>) {
        let (handle, rx) = f.registry.register(&ConnectionConfig::default());
        f.registry.set_player(handle.id, player_id, username);
        f.registry.set_map(handle.id, "samplemap");
        f.world
            .players
            .register_online(player_id, username)
            .await
            .unwrap();
        f.world
            .players
            .set_full_state(player_id, "samplemap", x, y, "down", 100, 100)
            .await
            .unwrap();
        (handle, rx)
    }

    fn recv_kind(rx: &mut tokio::sync::mpsc::Receiver<OutboundMessage>) -> Option<String> {
        match rx.try_recv().ok()? {
            OutboundMessage::Binary(bytes) => {
                Some(Envelope::decode(&bytes).unwrap().kind)
            }
            OutboundMessage::Close(_) => None,
        }
    }

    #[tokio::test]
    async fn welcome_carries_identity_and_config() {
        let f = fixture();
        let (handle, mut rx) = connect_player(&f, 1, "alice", 10, 10).await;
        f.world.skills.grant_all(1).await.unwrap();

        f.broadcaster.send_welcome(&handle, 1, "alice").await.unwrap();

        let OutboundMessage::Binary(bytes) = rx.try_recv().unwrap() else {
            panic!("expected binary frame");
        };
        let envelope = Envelope::decode(&bytes).unwrap();
        assert_eq!(envelope.kind, msg::EVENT_WELCOME);
        let payload: WelcomePayload = envelope.payload_as().unwrap();
        assert_eq!(payload.player.username, "alice");
        assert_eq!(payload.player.position.x, 10);
        assert_eq!(payload.config.chunk_size, 16);
        assert_eq!(payload.skills.len(), 9);
    }

    #[tokio::test]
    async fn state_update_is_radius_filtered_per_session() {
        let f = fixture();
        let (_h1, mut rx1) = connect_player(&f, 1, "near", 10, 10).await;
        let (_h2, mut rx2) = connect_player(&f, 2, "far", 50, 50).await;

        f.broadcaster.broadcast_state_updates().await.unwrap();

        let OutboundMessage::Binary(bytes) = rx1.try_recv().unwrap() else {
            panic!("expected binary frame");
        };
        let payload: StateUpdatePayload =
            Envelope::decode(&bytes).unwrap().payload_as().unwrap();
        // Player 2 is 40 tiles away: outside the radius of player 1.
        assert_eq!(payload.players.len(), 1);
        assert_eq!(payload.players[0].id, 1);

        let OutboundMessage::Binary(bytes) = rx2.try_recv().unwrap() else {
            panic!("expected binary frame");
        };
        let payload: StateUpdatePayload =
            Envelope::decode(&bytes).unwrap().payload_as().unwrap();
        assert_eq!(payload.players.len(), 1);
        assert_eq!(payload.players[0].id, 2);
    }

    #[tokio::test]
    async fn private_drop_only_reaches_owner() {
        let f = fixture();
        let (_h1, mut rx1) = connect_player(&f, 1, "owner", 10, 10).await;
        let (_h2, mut rx2) = connect_player(&f, 2, "other", 12, 12).await;

        let item = f
            .world
            .ground_items
            .create(18, "samplemap", 10, 10, 1, None, Some(1))
            .await
            .unwrap();
        f.broadcaster.ground_item_spawned(&item);

        assert_eq!(recv_kind(&mut rx1).as_deref(), Some(msg::EVENT_GROUND_ITEM_SPAWN));
        assert!(recv_kind(&mut rx2).is_none(), "stranger sees nothing yet");

        f.broadcaster.ground_item_went_public(&item);
        assert_eq!(recv_kind(&mut rx2).as_deref(), Some(msg::EVENT_GROUND_ITEM_SPAWN));
        assert!(recv_kind(&mut rx1).is_none(), "owner already knew");
    }

    #[tokio::test]
    async fn dm_chat_reaches_target_and_sender_only() {
        let f = fixture();
        let (_h1, mut rx1) = connect_player(&f, 1, "alice", 10, 10).await;
        let (_h2, mut rx2) = connect_player(&f, 2, "bob", 11, 11).await;
        let (_h3, mut rx3) = connect_player(&f, 3, "carol", 12, 12).await;

        f.broadcaster
            .chat_message(1, "alice", "dm:bob", "psst")
            .await
            .unwrap();

        assert_eq!(recv_kind(&mut rx1).as_deref(), Some(msg::EVENT_CHAT_MESSAGE));
        assert_eq!(recv_kind(&mut rx2).as_deref(), Some(msg::EVENT_CHAT_MESSAGE));
        assert!(recv_kind(&mut rx3).is_none());
    }

    #[tokio::test]
    async fn local_chat_is_radius_bound() {
        let f = fixture();
        let (_h1, mut rx1) = connect_player(&f, 1, "alice", 10, 10).await;
        let (_h2, mut rx2) = connect_player(&f, 2, "near", 12, 12).await;
        let (_h3, mut rx3) = connect_player(&f, 3, "far", 60, 60).await;

        f.broadcaster
            .chat_message(1, "alice", "local", "hello")
            .await
            .unwrap();

        assert!(recv_kind(&mut rx1).is_some(), "sender is inside own radius");
        assert!(recv_kind(&mut rx2).is_some());
        assert!(recv_kind(&mut rx3).is_none());
    }

    #[tokio::test]
    async fn shutdown_notice_reaches_everyone() {
        let f = fixture();
        let (_h1, mut rx1) = connect_player(&f, 1, "alice", 10, 10).await;
        let (_h2, mut rx2) = connect_player(&f, 2, "bob", 11, 11).await;

        f.broadcaster.server_shutdown("maintenance");
        assert_eq!(recv_kind(&mut rx1).as_deref(), Some(msg::EVENT_SERVER_SHUTDOWN));
        assert_eq!(recv_kind(&mut rx2).as_deref(), Some(msg::EVENT_SERVER_SHUTDOWN));
    }
}
