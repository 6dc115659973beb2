//! WebSocket session handling: upgrade, reader/writer task pair, and
//! teardown.
//!
//! Each session runs one reader task (decode envelope, dispatch, enqueue
//! reply) and one writer task (drain the bounded outbox onto the socket).
//! The dispatcher never touches the socket directly, so a slow peer can
//! only ever stall its own outbox.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tilefall_core::messages::{Envelope, ErrorPayload};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatch::{dispatch, handle_disconnect};
use crate::network::{ConnectionHandle, OutboundMessage};

use super::AppState;

/// Upgrades an HTTP connection to a WebSocket session.
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one session to completion.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, rx) = state.registry.register(&state.config.connection);
    debug!(connection_id = handle.id.0, "websocket session started");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx));

    read_loop(stream, &state, &handle).await;

    // Teardown order: game-state cleanup first (combat clear, flush,
    // unregister, map notice), then close the socket.
    handle_disconnect(&state.ctx, &handle).await;
    let _ = handle.try_send(OutboundMessage::Close(None));
    drop(handle);
    let _ = writer.await;
}

/// Drains the outbound channel onto the socket. Exits when every sender
/// is gone or the peer stops accepting writes.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Binary(bytes) => {
                if sink.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            OutboundMessage::Close(_reason) => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Decodes frames in arrival order and dispatches them one at a time, so
/// responses are FIFO per session and share their command's id.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    handle: &std::sync::Arc<ConnectionHandle>,
) {
    let mut shutdown = state.shutdown.subscribe();
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Binary(bytes))) => {
                let _guard = state.shutdown.in_flight_guard();
                let envelope = match Envelope::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(%err, connection_id = handle.id.0, "undecodable frame");
                        let payload =
                            ErrorPayload::new("internal_error", "Malformed message envelope");
                        if let Ok(reply) = Envelope::error("", &payload) {
                            let _ = handle.try_send_envelope(&reply);
                        }
                        continue;
                    }
                };

                let outcome = dispatch(&state.ctx, handle, envelope).await;
                if let Some(reply) = outcome.reply {
                    if let Ok(encoded) = reply.encode() {
                        // Responses matter more than events: wait for
                        // outbox room instead of dropping.
                        let _ = handle
                            .send_timeout(
                                OutboundMessage::Binary(encoded),
                                state.config.connection.send_timeout,
                            )
                            .await;
                    }
                }
                if outcome.close {
                    break;
                }
            }
            // axum answers pings itself; text frames are not part of the
            // protocol.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                debug!(%err, connection_id = handle.id.0, "websocket read error");
                break;
            }
        }
    }
}
