//! WebSocket relay handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::substrate::wire::{ClientMessage, PresenceEntry, ServerMessage};
use crate::substrate::{RelayEvent, RelayRoom};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Stable id of the connecting replica; a fresh one is assigned if absent
    pub client_id: Option<Uuid>,
}

/// WebSocket handler for `/ws/:room_id`
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let client_id = params.client_id.unwrap_or_else(Uuid::new_v4);
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, client_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String, client_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let relay = state.hub.get_or_create(&room_id).await;
    let handshake = relay.join(client_id).await;

    let sync = ServerMessage::Sync {
        state: handshake.state,
        presence: handshake
            .presence
            .into_iter()
            .map(|(client_id, state)| PresenceEntry { client_id, state })
            .collect(),
    };
    if send(&mut sender, &sync).await.is_err() {
        relay.leave(client_id).await;
        return;
    }

    tracing::info!(room = %room_id, %client_id, "Relay client connected");

    // Relay events -> socket
    let mut events = handshake.events;
    let forward_relay = Arc::clone(&relay);
    let mut forward = tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(RelayEvent::Update { source, update }) => {
                    if source == client_id {
                        continue;
                    }
                    ServerMessage::Update { update }
                }
                Ok(RelayEvent::Presence { client_id: other, state }) => {
                    if other == client_id {
                        continue;
                    }
                    match state {
                        Some(state) => ServerMessage::Presence { client_id: other, state },
                        None => ServerMessage::PresenceLeft { client_id: other },
                    }
                }
                Ok(RelayEvent::Evicted { client_id: other }) => {
                    if other == client_id {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    continue;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%client_id, skipped, "Client lagged, resending full state");
                    ServerMessage::Update {
                        update: forward_relay.replica().encode_state(),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if send(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    });

    // Socket -> relay
    let receive_relay = Arc::clone(&relay);
    let mut receive = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(%client_id, "WebSocket error: {}", e);
                    break;
                }
            };

            handle_message(&receive_relay, client_id, &text).await;
        }
    });

    // Whichever side finishes first ends the connection
    tokio::select! {
        _ = &mut forward => receive.abort(),
        _ = &mut receive => forward.abort(),
    }

    relay.leave(client_id).await;
    tracing::info!(room = %room_id, %client_id, "Relay client disconnected");
}

async fn handle_message(relay: &RelayRoom, client_id: Uuid, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(%client_id, "Invalid client message: {}", e);
            return;
        }
    };

    match msg {
        ClientMessage::Update { update } => {
            if let Err(e) = relay.apply_update(client_id, &update).await {
                tracing::warn!(room = %relay.room_id(), %client_id, "Rejected update: {}", e);
            }
        }
        ClientMessage::Presence { state } => {
            relay.set_presence(client_id, state).await;
        }
    }
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<(), ()> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode relay message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await.map_err(|e| {
        tracing::debug!("Failed to send relay message: {}", e);
    })
}
