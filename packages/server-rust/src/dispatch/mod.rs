//! Command dispatcher: envelope in, envelope out.
//!
//! The WebSocket reader calls [`dispatch`] for every decoded frame. The
//! first command on a session must be `cmd_authenticate`; everything else
//! is routed to the matching service, and the structured result is
//! translated into a `resp_success`/`resp_error` sharing the command's id.
//! No error crosses the session boundary as anything but an envelope.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde_json::json;
use tilefall_core::messages::{
    msg, AttackPayload, AuthenticatePayload, ChunkRequestPayload, DropItemPayload, Envelope,
    EquipItemPayload, MoveInventoryItemPayload, MoveOkPayload, MovePayload, PickupItemPayload,
    SendChatMessagePayload, UnequipItemPayload,
};
use tilefall_core::types::EquipmentSlot;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::events::EventBroadcaster;
use crate::network::{ConnectionHandle, ConnectionRegistry};
use crate::service::{CombatService, ErrorCode, MovementService, ServiceError, ServiceResult};
use crate::state::PickupOutcome;
use crate::world::World;

/// Default max HP for a player with no persisted row yet.
const DEFAULT_MAX_HP: i32 = 100;

/// Everything the dispatcher and session loops need, wired once at startup.
pub struct ServerContext {
    pub world: Arc<World>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub movement: MovementService,
    pub combat: CombatService,
    pub verifier: TokenVerifier,
    /// Map new players spawn on.
    pub default_map_id: String,
}

impl ServerContext {
    #[must_use]
    pub fn new(
        world: Arc<World>,
        registry: Arc<ConnectionRegistry>,
        jwt_secret: &str,
        default_map_id: impl Into<String>,
    ) -> Arc<Self> {
        let broadcaster = Arc::new(EventBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&world),
        ));
        Arc::new(Self {
            movement: MovementService::new(Arc::clone(&world)),
            combat: CombatService::new(Arc::clone(&world)),
            verifier: TokenVerifier::new(jwt_secret),
            broadcaster,
            registry,
            world,
            default_map_id: default_map_id.into(),
        })
    }
}

/// What the reader loop does after one command.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The response to send back, if any (`cmd_chunk_request` answers with
    /// an event instead).
    pub reply: Option<Envelope>,
    /// Whether to close the connection after sending.
    pub close: bool,
}

impl DispatchOutcome {
    fn reply(envelope: Envelope) -> Self {
        Self {
            reply: Some(envelope),
            close: false,
        }
    }

    fn none() -> Self {
        Self {
            reply: None,
            close: false,
        }
    }
}

fn error_reply(request_id: &str, err: &ServiceError) -> DispatchOutcome {
    let close = err.code.terminates_session();
    let reply = Envelope::error(request_id, &err.to_payload()).ok();
    DispatchOutcome { reply, close }
}

fn success_reply<T: serde::Serialize>(request_id: &str, payload: &T) -> DispatchOutcome {
    match Envelope::success(request_id, payload) {
        Ok(envelope) => DispatchOutcome::reply(envelope),
        Err(err) => {
            error!(%err, "failed to encode success payload");
            error_reply(
                request_id,
                &ServiceError::new(ErrorCode::Internal, "Internal error"),
            )
        }
    }
}

fn decode_payload<T: DeserializeOwned>(envelope: &Envelope) -> ServiceResult<T> {
    envelope.payload_as().map_err(|_| {
        ServiceError::new(
            ErrorCode::InvalidSlot,
            format!("malformed payload for {}", envelope.kind),
        )
    })
}

/// Routes one decoded envelope.
pub async fn dispatch(
    ctx: &ServerContext,
    handle: &Arc<ConnectionHandle>,
    envelope: Envelope,
) -> DispatchOutcome {
    if envelope.kind == msg::CMD_AUTHENTICATE {
        return authenticate(ctx, handle, &envelope).await;
    }

    let Some(player_id) = handle.player_id() else {
        let err = ServiceError::new(
            ErrorCode::NotAuthenticated,
            "Authenticate before sending commands",
        );
        return error_reply(&envelope.id, &err);
    };

    match envelope.kind.as_str() {
        msg::CMD_MOVE => cmd_move(ctx, player_id, &envelope).await,
        msg::CMD_ATTACK => cmd_attack(ctx, player_id, &envelope).await,
        msg::CMD_CHUNK_REQUEST => cmd_chunk_request(ctx, handle, &envelope),
        msg::CMD_MOVE_INVENTORY_ITEM => cmd_move_inventory_item(ctx, player_id, &envelope).await,
        msg::CMD_SORT_INVENTORY => cmd_sort_inventory(ctx, player_id, &envelope).await,
        msg::CMD_DROP_ITEM => cmd_drop_item(ctx, player_id, &envelope).await,
        msg::CMD_PICKUP_ITEM => cmd_pickup_item(ctx, player_id, &envelope).await,
        msg::CMD_EQUIP_ITEM => cmd_equip_item(ctx, player_id, &envelope).await,
        msg::CMD_UNEQUIP_ITEM => cmd_unequip_item(ctx, player_id, &envelope).await,
        msg::CMD_SEND_CHAT_MESSAGE => cmd_send_chat(ctx, player_id, &envelope).await,
        other => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::NotImplemented, format!("unknown command {other}")),
        ),
    }
}

/// Handshake: verify the token, refuse banned/timed-out accounts, hydrate
/// the player, register the session, and push `event_welcome`.
async fn authenticate(
    ctx: &ServerContext,
    handle: &Arc<ConnectionHandle>,
    envelope: &Envelope,
) -> DispatchOutcome {
    if handle.session.read().authenticated {
        return error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::Internal, "Session already authenticated"),
        );
    }
    let payload: AuthenticatePayload = match envelope.payload_as() {
        Ok(payload) => payload,
        Err(_) => {
            let mut outcome = error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::NotAuthenticated, "Malformed authentication"),
            );
            outcome.close = true;
            return outcome;
        }
    };

    let claims = match ctx.verifier.verify(&payload.token) {
        Ok(claims) => claims,
        Err(err) => return error_reply(&envelope.id, &err),
    };

    // Account standing comes from the durable store, not the token.
    let row = match ctx.world.store.load_player(claims.player_id).await {
        Ok(row) => row,
        Err(err) => {
            error!(%err, player_id = claims.player_id, "player lookup failed");
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::Internal, "Internal error"),
            );
        }
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    if let Some(row) = &row {
        if row.is_banned {
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::Banned, "Account is banned"),
            );
        }
        if row.timeout_until.is_some_and(|until| until > now) {
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::TimedOut, "Account is timed out"),
            );
        }
    }

    // Duplicate registration is an invariant violation: refuse and close.
    if let Err(err) = ctx
        .world
        .players
        .register_online(claims.player_id, &claims.username)
        .await
    {
        error!(%err, player_id = claims.player_id, "refusing duplicate login");
        let mut outcome = error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::Internal, "Player is already connected"),
        );
        outcome.close = true;
        return outcome;
    }

    let (map_id, x, y, current_hp, max_hp, facing) = match &row {
        Some(row) => (
            row.map_id.clone(),
            row.x,
            row.y,
            row.current_hp,
            row.max_hp,
            row.facing.clone(),
        ),
        None => {
            let (x, y) = ctx
                .world
                .maps
                .spawn_position(&ctx.default_map_id)
                .unwrap_or((0, 0));
            (
                ctx.default_map_id.clone(),
                x,
                y,
                DEFAULT_MAX_HP,
                DEFAULT_MAX_HP,
                "down".to_string(),
            )
        }
    };

    let hydrate = async {
        ctx.world
            .players
            .set_full_state(claims.player_id, &map_id, x, y, &facing, current_hp, max_hp)
            .await?;
        ctx.world.skills.grant_all(claims.player_id).await?;
        // Warm the inventory and equipment caches from the store.
        ctx.world.inventories.get_inventory(claims.player_id).await?;
        ctx.world.equipment.get_equipment(claims.player_id).await?;
        anyhow::Ok(())
    };
    if let Err(err) = hydrate.await {
        error!(%err, player_id = claims.player_id, "login hydration failed");
        let _ = ctx.world.players.unregister_online(claims.player_id).await;
        let mut outcome = error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::Internal, "Internal error"),
        );
        outcome.close = true;
        return outcome;
    }

    ctx.registry
        .set_player(handle.id, claims.player_id, &claims.username);
    ctx.registry.set_map(handle.id, &map_id);

    info!(player_id = claims.player_id, username = %claims.username, "player authenticated");
    metrics::counter!("logins_total").increment(1);

    if let Err(err) = ctx
        .broadcaster
        .send_welcome(handle, claims.player_id, &claims.username)
        .await
    {
        warn!(%err, player_id = claims.player_id, "failed to send welcome");
    }
    if let Err(err) = ctx
        .broadcaster
        .send_visible_ground_items(handle, claims.player_id, &map_id)
        .await
    {
        warn!(%err, player_id = claims.player_id, "failed to send ground items");
    }

    success_reply(
        &envelope.id,
        &json!({
            "player_id": claims.player_id,
            "username": claims.username,
        }),
    )
}

async fn cmd_move(ctx: &ServerContext, player_id: i64, envelope: &Envelope) -> DispatchOutcome {
    let payload: MovePayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    match ctx
        .movement
        .execute_movement(player_id, &payload.direction)
        .await
    {
        Ok(outcome) => success_reply(
            &envelope.id,
            &MoveOkPayload {
                new_position: outcome.new_position,
            },
        ),
        Err(err) => error_reply(&envelope.id, &err),
    }
}

async fn cmd_attack(ctx: &ServerContext, player_id: i64, envelope: &Envelope) -> DispatchOutcome {
    let payload: AttackPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    match ctx
        .combat
        .attack(player_id, payload.target_type, payload.target_id)
        .await
    {
        Ok(resolution) => {
            for award in &resolution.awards {
                ctx.broadcaster.skill_update(player_id, award);
            }
            success_reply(&envelope.id, &resolution.payload)
        }
        Err(err) => error_reply(&envelope.id, &err),
    }
}

/// Answers with `event_chunk_data` (fresh id) instead of a `resp_success`.
fn cmd_chunk_request(
    ctx: &ServerContext,
    handle: &Arc<ConnectionHandle>,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: ChunkRequestPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    let Some(map) = ctx.world.maps.get(&payload.map_id) else {
        return error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::NotFound, format!("unknown map {}", payload.map_id)),
        );
    };
    let chunk = map.chunk(payload.cx, payload.cy);
    match Envelope::with_payload(Uuid::new_v4().to_string(), msg::EVENT_CHUNK_DATA, &chunk) {
        Ok(event) => {
            let _ = handle.try_send_envelope(&event);
            DispatchOutcome::none()
        }
        Err(err) => {
            error!(%err, "failed to encode chunk data");
            error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::Internal, "Internal error"),
            )
        }
    }
}

async fn cmd_move_inventory_item(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: MoveInventoryItemPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    match ctx
        .world
        .inventories
        .move_item(player_id, payload.from_slot, payload.to_slot)
        .await
    {
        Ok(true) => {
            let _ = ctx.broadcaster.inventory_update(player_id).await;
            success_reply(&envelope.id, &json!({"moved": true}))
        }
        Ok(false) => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::InvalidSlot, "Nothing to move from that slot"),
        ),
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn cmd_sort_inventory(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    match ctx.world.inventories.sort_inventory(player_id).await {
        Ok(()) => {
            let _ = ctx.broadcaster.inventory_update(player_id).await;
            success_reply(&envelope.id, &json!({"sorted": true}))
        }
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn cmd_drop_item(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: DropItemPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    let position = match ctx.world.players.get_position(player_id).await {
        Ok(Some(position)) => position,
        Ok(None) => {
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"),
            )
        }
        Err(err) => return error_reply(&envelope.id, &ServiceError::from(err)),
    };
    let removed = match ctx
        .world
        .inventories
        .remove_quantity(player_id, payload.slot, payload.quantity)
        .await
    {
        Ok(Some(removed)) => removed,
        Ok(None) => {
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::InvalidSlot, "Nothing in that slot"),
            )
        }
        Err(err) => return error_reply(&envelope.id, &ServiceError::from(err)),
    };
    match ctx
        .world
        .ground_items
        .create(
            removed.item_id,
            &position.map_id,
            position.x,
            position.y,
            removed.quantity,
            removed.current_durability,
            Some(player_id),
        )
        .await
    {
        Ok(item) => {
            ctx.broadcaster.ground_item_spawned(&item);
            let _ = ctx.broadcaster.inventory_update(player_id).await;
            success_reply(&envelope.id, &json!({"ground_id": item.id}))
        }
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn cmd_pickup_item(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: PickupItemPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    match ctx.world.ground_items.pick_up(player_id, payload.ground_id).await {
        Ok(PickupOutcome::PickedUp(item)) => {
            ctx.broadcaster.ground_item_despawned(&item);
            let _ = ctx.broadcaster.inventory_update(player_id).await;
            success_reply(&envelope.id, &json!({"item_id": item.item_id, "quantity": item.quantity}))
        }
        // Items inside another player's privacy window are invisible, so
        // they report the same way as missing ones.
        Ok(PickupOutcome::NotFound | PickupOutcome::NotYours) => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::NotFound, "Item not found"),
        ),
        Ok(PickupOutcome::InventoryFull) => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::InventoryFull, "Inventory is full"),
        ),
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn cmd_equip_item(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: EquipItemPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    match ctx.world.equipment.equip(player_id, payload.inv_slot).await {
        Ok(outcome) => equip_outcome_reply(ctx, player_id, envelope, outcome).await,
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn cmd_unequip_item(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: UnequipItemPayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    let Ok(slot) = payload.eq_slot.parse::<EquipmentSlot>() else {
        return error_reply(
            &envelope.id,
            &ServiceError::new(
                ErrorCode::InvalidSlot,
                format!("'{}' is not an equipment slot", payload.eq_slot),
            ),
        );
    };
    match ctx.world.equipment.unequip(player_id, slot).await {
        Ok(outcome) => equip_outcome_reply(ctx, player_id, envelope, outcome).await,
        Err(err) => error_reply(&envelope.id, &ServiceError::from(err)),
    }
}

async fn equip_outcome_reply(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
    outcome: crate::state::EquipOutcome,
) -> DispatchOutcome {
    use crate::state::EquipOutcome;
    match outcome {
        EquipOutcome::Done => {
            let _ = ctx.broadcaster.inventory_update(player_id).await;
            let _ = ctx.broadcaster.equipment_update(player_id).await;
            success_reply(&envelope.id, &json!({"done": true}))
        }
        EquipOutcome::EmptySlot => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::InvalidSlot, "That slot is empty"),
        ),
        EquipOutcome::NotEquippable => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::NotEquippable, "That item cannot be equipped"),
        ),
        EquipOutcome::InventoryFull => error_reply(
            &envelope.id,
            &ServiceError::new(ErrorCode::InventoryFull, "Inventory is full"),
        ),
        EquipOutcome::TwoHandedConflict => error_reply(
            &envelope.id,
            &ServiceError::new(
                ErrorCode::NotEquippable,
                "Cannot equip a shield with a two-handed weapon",
            ),
        ),
    }
}

async fn cmd_send_chat(
    ctx: &ServerContext,
    player_id: i64,
    envelope: &Envelope,
) -> DispatchOutcome {
    let payload: SendChatMessagePayload = match decode_payload(envelope) {
        Ok(payload) => payload,
        Err(err) => return error_reply(&envelope.id, &err),
    };
    let valid_channel = payload.channel == "global"
        || payload.channel == "local"
        || payload.channel.starts_with("dm:");
    if !valid_channel {
        return error_reply(
            &envelope.id,
            &ServiceError::new(
                ErrorCode::NotFound,
                format!("unknown channel {}", payload.channel),
            ),
        );
    }
    let username = match ctx.world.players.username(player_id).await {
        Ok(Some(username)) => username,
        Ok(None) => {
            return error_reply(
                &envelope.id,
                &ServiceError::new(ErrorCode::PlayerNotOnline, "Player not online"),
            )
        }
        Err(err) => return error_reply(&envelope.id, &ServiceError::from(err)),
    };
    match ctx
        .broadcaster
        .chat_message(player_id, &username, &payload.channel, &payload.text)
        .await
    {
        Ok(()) => success_reply(&envelope.id, &json!({"sent": true})),
        Err(err) => error_reply(&envelope.id, &err),
    }
}

/// Session teardown: clear combat, flush the player's state, drop the hot
/// cache entries, unregister, and tell the map.
pub async fn handle_disconnect(ctx: &ServerContext, handle: &Arc<ConnectionHandle>) {
    let session = handle.session.read().clone();
    ctx.registry.remove(handle.id);
    let (Some(player_id), Some(username)) = (session.player_id, session.username) else {
        return;
    };

    // An interrupted fight ends; the flush then captures final state.
    if let Err(err) = ctx.world.players.clear_combat_state(player_id).await {
        warn!(%err, player_id, "failed to clear combat state on disconnect");
    }
    if let Err(err) = ctx.world.sync.sync_player(player_id).await {
        // The dirty flags remain set, so the periodic sync retries.
        warn!(%err, player_id, "disconnect flush failed");
    } else {
        let clear = async {
            ctx.world.players.clear(player_id).await?;
            ctx.world.inventories.clear(player_id).await?;
            ctx.world.equipment.clear(player_id).await?;
            ctx.world.skills.clear(player_id).await?;
            anyhow::Ok(())
        };
        if let Err(err) = clear.await {
            warn!(%err, player_id, "failed to clear hot state on disconnect");
        }
    }
    if let Err(err) = ctx.world.players.unregister_online(player_id).await {
        warn!(%err, player_id, "failed to unregister player");
    }

    if let Some(map_id) = session.map_id {
        ctx.broadcaster
            .player_disconnected(&map_id, player_id, &username);
    }
    info!(player_id, %username, "player disconnected");
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use tilefall_core::messages::{ErrorPayload, WelcomePayload};
    use tilefall_core::types::Position;

    use super::*;
    use crate::auth::issue_token;
    use crate::network::{ConnectionConfig, OutboundMessage};
    use crate::world::test_world;

    const SECRET: &str = "test-secret";

    fn context() -> (Arc<ServerContext>, Arc<ConnectionRegistry>) {
        let (world, clock) = test_world();
        // Unit tests here drive the dispatcher directly; keep the game
        // clock past the epoch so cooldowns behave.
        clock.set(1_000_000.0);
        let registry = Arc::new(ConnectionRegistry::new());
        (
            ServerContext::new(world, Arc::clone(&registry), SECRET, "samplemap"),
            registry,
        )
    }

    fn token(player_id: i64, username: &str) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        issue_token(SECRET, player_id, username, exp).unwrap()
    }

    fn auth_envelope(id: &str, token: &str) -> Envelope {
        Envelope::with_payload(
            id,
            msg::CMD_AUTHENTICATE,
            &AuthenticatePayload {
                token: token.to_string(),
            },
        )
        .unwrap()
    }

    async fn authed_session(
        ctx: &Arc<ServerContext>,
        registry: &Arc<ConnectionRegistry>,
        player_id: i64,
        username: &str,
    ) -> (
        Arc<ConnectionHandle>,
        tokio::sync::mpsc::Receiver<OutboundMessage>,
    ) {
        let (handle, rx) = registry.register(&ConnectionConfig::default());
        let outcome = dispatch(ctx, &handle, auth_envelope("a-1", &token(player_id, username))).await;
        assert_eq!(outcome.reply.unwrap().kind, msg::RESP_SUCCESS);
        (handle, rx)
    }

    #[tokio::test]
    async fn first_command_must_be_authenticate() {
        let (ctx, registry) = context();
        let (handle, _rx) = registry.register(&ConnectionConfig::default());

        let envelope = Envelope::with_payload(
            "m-1",
            msg::CMD_MOVE,
            &MovePayload {
                direction: "up".to_string(),
            },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;

        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_ERROR);
        assert_eq!(reply.id, "m-1");
        let payload: ErrorPayload = reply.payload_as().unwrap();
        assert_eq!(payload.error_code.as_deref(), Some("not_authenticated"));
        assert!(outcome.close, "auth failures terminate the session");
    }

    #[tokio::test]
    async fn authenticate_registers_and_sends_welcome() {
        let (ctx, registry) = context();
        let (handle, mut rx) = registry.register(&ConnectionConfig::default());

        let outcome = dispatch(&ctx, &handle, auth_envelope("a-1", &token(7, "alice"))).await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_SUCCESS);
        assert_eq!(reply.id, "a-1");
        assert!(!outcome.close);

        assert!(ctx.world.players.is_online(7).await.unwrap());
        assert!(handle.session.read().authenticated);

        // The welcome event is already queued on the outbox.
        let OutboundMessage::Binary(bytes) = rx.try_recv().unwrap() else {
            panic!("expected welcome frame");
        };
        let event = Envelope::decode(&bytes).unwrap();
        assert_eq!(event.kind, msg::EVENT_WELCOME);
        let welcome: WelcomePayload = event.payload_as().unwrap();
        assert_eq!(welcome.player.username, "alice");
        // New players spawn at the default map's spawn tile.
        assert_eq!(welcome.player.position, Position::new("samplemap", 32, 32));
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let (ctx, registry) = context();
        let (handle, _rx) = registry.register(&ConnectionConfig::default());

        let outcome = dispatch(&ctx, &handle, auth_envelope("a-1", "garbage")).await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_ERROR);
        let payload: ErrorPayload = reply.payload_as().unwrap();
        assert_eq!(payload.error_code.as_deref(), Some("not_authenticated"));
        assert!(outcome.close);
    }

    #[tokio::test]
    async fn duplicate_login_is_refused_and_closed() {
        let (ctx, registry) = context();
        let (_h1, _rx1) = authed_session(&ctx, &registry, 7, "alice").await;

        let (h2, _rx2) = registry.register(&ConnectionConfig::default());
        let outcome = dispatch(&ctx, &h2, auth_envelope("a-2", &token(7, "alice"))).await;
        assert_eq!(outcome.reply.unwrap().kind, msg::RESP_ERROR);
        assert!(outcome.close);
    }

    #[tokio::test]
    async fn move_command_round_trips() {
        let (ctx, registry) = context();
        let (handle, _rx) = authed_session(&ctx, &registry, 7, "alice").await;

        let envelope = Envelope::with_payload(
            "m-1",
            msg::CMD_MOVE,
            &MovePayload {
                direction: "up".to_string(),
            },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_SUCCESS);
        let payload: MoveOkPayload = reply.payload_as().unwrap();
        assert_eq!((payload.new_position.x, payload.new_position.y), (32, 31));

        // Immediate second move is rate limited.
        let envelope = Envelope::with_payload(
            "m-2",
            msg::CMD_MOVE,
            &MovePayload {
                direction: "up".to_string(),
            },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_ERROR);
        let payload: ErrorPayload = reply.payload_as().unwrap();
        assert_eq!(payload.error_code.as_deref(), Some("rate_limited"));
        assert!(payload.cooldown_remaining.unwrap() > 0.0);
        assert!(!outcome.close, "game-rule errors keep the session");
    }

    #[tokio::test]
    async fn chunk_request_answers_with_event() {
        let (ctx, registry) = context();
        let (handle, mut rx) = authed_session(&ctx, &registry, 7, "alice").await;
        // Drain the welcome frame.
        let _ = rx.try_recv();

        let envelope = Envelope::with_payload(
            "c-1",
            msg::CMD_CHUNK_REQUEST,
            &ChunkRequestPayload {
                map_id: "samplemap".to_string(),
                cx: 0,
                cy: 0,
            },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;
        assert!(outcome.reply.is_none(), "chunk data arrives as an event");

        let OutboundMessage::Binary(bytes) = rx.try_recv().unwrap() else {
            panic!("expected chunk frame");
        };
        let event = Envelope::decode(&bytes).unwrap();
        assert_eq!(event.kind, msg::EVENT_CHUNK_DATA);
    }

    #[tokio::test]
    async fn unknown_command_is_not_implemented() {
        let (ctx, registry) = context();
        let (handle, _rx) = authed_session(&ctx, &registry, 7, "alice").await;

        let envelope = Envelope::new("x-1", "cmd_dance", rmpv::Value::Nil);
        let outcome = dispatch(&ctx, &handle, envelope).await;
        let payload: ErrorPayload = outcome.reply.unwrap().payload_as().unwrap();
        assert_eq!(payload.error_code.as_deref(), Some("not_implemented"));
    }

    #[tokio::test]
    async fn drop_then_pickup_round_trips_through_ground() {
        let (ctx, registry) = context();
        let (handle, _rx) = authed_session(&ctx, &registry, 7, "alice").await;
        let bread = ctx.world.reference.item_by_name("bread").unwrap().id;
        ctx.world.inventories.add_item(7, bread, 5).await.unwrap();

        let envelope = Envelope::with_payload(
            "d-1",
            msg::CMD_DROP_ITEM,
            &DropItemPayload { slot: 0, quantity: 2 },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;
        let reply = outcome.reply.unwrap();
        assert_eq!(reply.kind, msg::RESP_SUCCESS);
        let ground_id = reply
            .payload
            .as_map()
            .unwrap()
            .iter()
            .find(|(k, _)| k.as_str() == Some("ground_id"))
            .and_then(|(_, v)| v.as_i64())
            .unwrap();

        let envelope = Envelope::with_payload(
            "p-1",
            msg::CMD_PICKUP_ITEM,
            &PickupItemPayload { ground_id },
        )
        .unwrap();
        let outcome = dispatch(&ctx, &handle, envelope).await;
        assert_eq!(outcome.reply.unwrap().kind, msg::RESP_SUCCESS);

        let inventory = ctx.world.inventories.get_inventory(7).await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].1.quantity, 5, "back to the original stack");
    }

    #[tokio::test]
    async fn disconnect_unregisters_and_flushes() {
        let (ctx, registry) = context();
        let (handle, _rx) = authed_session(&ctx, &registry, 7, "alice").await;
        assert!(ctx.world.players.is_online(7).await.unwrap());

        handle_disconnect(&ctx, &handle).await;
        assert!(!ctx.world.players.is_online(7).await.unwrap());
        assert_eq!(registry.count(), 0);
    }
}
