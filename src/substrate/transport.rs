//! Connecting room replicas to a relay
//!
//! A [`Connector`] attaches an existing [`SharedRoom`] replica and its
//! [`Presence`] table to a relay. The same replica can be reconnected after
//! a drop; the handshake exchanges full state in both directions so edits
//! made while offline are merged.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::hub::{Hub, RelayEvent, RelayRoom};
use super::presence::{Presence, PresenceEvent};
use super::room::SharedRoom;
use super::wire::{ClientMessage, ServerMessage};
use crate::error::{CollabError, Result};

/// Connection status of one room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

/// Something that can attach a replica to a relay
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and wait for the initial state exchange to complete
    async fn connect(&self, room: Arc<SharedRoom>, presence: Arc<Presence>) -> Result<RoomConnection>;
}

enum Link {
    Local(Arc<RelayRoom>),
    Socket,
}

/// A live attachment of one replica to a relay
pub struct RoomConnection {
    room: Arc<SharedRoom>,
    presence: Arc<Presence>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    link: Link,
}

impl RoomConnection {
    fn new(room: Arc<SharedRoom>, presence: Arc<Presence>, link: Link) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            room,
            presence,
            status: Arc::new(status),
            tasks: Mutex::new(Vec::new()),
            link,
        }
    }

    pub fn room(&self) -> &Arc<SharedRoom> {
        &self.room
    }

    pub fn presence(&self) -> &Arc<Presence> {
        &self.presence
    }

    pub fn client_id(&self) -> Uuid {
        self.presence.client_id()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: ConnectionStatus) {
        set_status(&self.status, self.room.room_id(), status);
    }

    fn spawn(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Stop relaying and mark the room disconnected
    pub async fn disconnect(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        if let Link::Local(relay) = &self.link {
            relay.leave(self.client_id()).await;
        }
        self.presence.clear_remote();
        self.set_status(ConnectionStatus::Disconnected);
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn set_status(sender: &watch::Sender<ConnectionStatus>, room_id: &str, status: ConnectionStatus) {
    let previous = sender.send_replace(status);
    if previous != status {
        tracing::info!(room = %room_id, status = status.as_str(), "Room connection status changed");
    }
}

/// Connects replicas to an in-process [`Hub`]
#[derive(Clone)]
pub struct LocalConnector {
    hub: Arc<Hub>,
}

impl LocalConnector {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, room: Arc<SharedRoom>, presence: Arc<Presence>) -> Result<RoomConnection> {
        let relay = self.hub.get_or_create(room.room_id()).await;
        let client_id = presence.client_id();
        let connection = RoomConnection::new(Arc::clone(&room), Arc::clone(&presence), Link::Local(Arc::clone(&relay)));

        let mut outbound = room.outbound();
        let mut local_presence = presence.subscribe();
        let handshake = relay.join(client_id).await;

        room.apply_remote(&handshake.state)?;
        for (id, state) in handshake.presence {
            presence.apply_remote(id, Some(state));
        }
        relay.apply_update(client_id, &room.encode_state()).await?;
        if let Some(state) = presence.local_state() {
            relay.set_presence(client_id, state).await;
        }

        // Local updates -> relay
        let pump_relay = Arc::clone(&relay);
        let pump_room = Arc::clone(&room);
        connection.spawn(tokio::spawn(async move {
            loop {
                match outbound.recv().await {
                    Ok(update) => {
                        if let Err(e) = pump_relay.apply_update(client_id, &update).await {
                            tracing::warn!("Relay rejected local update: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Outbound updates lagged, resending full state");
                        let state = pump_room.encode_state();
                        if let Err(e) = pump_relay.apply_update(client_id, &state).await {
                            tracing::warn!("Relay rejected full state: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Relay events -> local replica and presence
        let mut events = handshake.events;
        let inbound_relay = Arc::clone(&relay);
        let inbound_room = Arc::clone(&room);
        let inbound_presence = Arc::clone(&presence);
        let inbound_status = Arc::clone(&connection.status);
        connection.spawn(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RelayEvent::Update { source, update }) => {
                        if source == client_id {
                            continue;
                        }
                        if let Err(e) = inbound_room.apply_remote(&update) {
                            tracing::warn!("Failed to apply relayed update: {}", e);
                        }
                    }
                    Ok(RelayEvent::Presence { client_id: other, state }) => {
                        if other != client_id {
                            inbound_presence.apply_remote(other, state);
                        }
                    }
                    Ok(RelayEvent::Evicted { client_id: other }) => {
                        if other == client_id {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Relay events lagged, resyncing from relay state");
                        let state = inbound_relay.replica().encode_state();
                        if let Err(e) = inbound_room.apply_remote(&state) {
                            tracing::warn!("Failed to resync: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound_presence.clear_remote();
            set_status(&inbound_status, inbound_room.room_id(), ConnectionStatus::Disconnected);
        }));

        // Local presence -> relay
        let presence_relay = Arc::clone(&relay);
        connection.spawn(tokio::spawn(async move {
            while let Ok(event) = local_presence.recv().await {
                if let PresenceEvent::Updated { client_id: id, state } = event {
                    if id == client_id {
                        presence_relay.set_presence(client_id, state).await;
                    }
                }
            }
        }));

        connection.set_status(ConnectionStatus::Connected);
        Ok(connection)
    }
}

/// Connects replicas to a relay server over websockets
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    /// `base_url` is the transport url, e.g. `ws://localhost:3000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn room_url(&self, room_id: &str, client_id: Uuid) -> String {
        format!("{}/ws/{}?client_id={}", self.base_url, room_id, client_id)
    }
}

fn encode(msg: &ClientMessage) -> Result<Message> {
    serde_json::to_string(msg)
        .map(|text| Message::Text(text.into()))
        .map_err(|e| CollabError::Internal(e.to_string()))
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, room: Arc<SharedRoom>, presence: Arc<Presence>) -> Result<RoomConnection> {
        let client_id = presence.client_id();
        let url = self.room_url(room.room_id(), client_id);
        let connection = RoomConnection::new(Arc::clone(&room), Arc::clone(&presence), Link::Socket);

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| CollabError::Transport(format!("Failed to connect to {}: {}", url, e)))?;
        let (mut sink, mut stream) = socket.split();

        // The relay opens with the full room state
        let (state, peers) = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Sync { state, presence }) => break (state, presence),
                    Ok(ServerMessage::Error { message }) => return Err(CollabError::Transport(message)),
                    Ok(other) => {
                        tracing::debug!("Ignoring {:?} before sync", other);
                    }
                    Err(e) => return Err(CollabError::Transport(format!("Invalid relay message: {}", e))),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(CollabError::Transport("Relay closed during handshake".to_string()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(CollabError::Transport(e.to_string())),
            }
        };

        let mut outbound = room.outbound();
        let mut local_presence = presence.subscribe();

        room.apply_remote(&state)?;
        for entry in peers {
            presence.apply_remote(entry.client_id, Some(entry.state));
        }

        let hello = encode(&ClientMessage::Update { update: room.encode_state() })?;
        sink.send(hello)
            .await
            .map_err(|e| CollabError::Transport(e.to_string()))?;
        if let Some(state) = presence.local_state() {
            sink.send(encode(&ClientMessage::Presence { state })?)
                .await
                .map_err(|e| CollabError::Transport(e.to_string()))?;
        }

        // Local updates and presence -> socket
        let writer_status = Arc::clone(&connection.status);
        let writer_room = Arc::clone(&room);
        connection.spawn(tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    update = outbound.recv() => match update {
                        Ok(update) => ClientMessage::Update { update },
                        Err(broadcast::error::RecvError::Lagged(_)) => ClientMessage::Update {
                            update: writer_room.encode_state(),
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = local_presence.recv() => match event {
                        Ok(PresenceEvent::Updated { client_id: id, state }) if id == client_id => {
                            ClientMessage::Presence { state }
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let frame = match encode(&msg) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Failed to encode relay message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!("Relay socket write failed: {}", e);
                    set_status(&writer_status, writer_room.room_id(), ConnectionStatus::Disconnected);
                    break;
                }
            }
        }));

        // Socket -> local replica and presence
        let reader_status = Arc::clone(&connection.status);
        let reader_room = Arc::clone(&room);
        let reader_presence = Arc::clone(&presence);
        connection.spawn(tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("Relay socket error: {}", e);
                        break;
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Update { update }) | Ok(ServerMessage::Sync { state: update, .. }) => {
                        if let Err(e) = reader_room.apply_remote(&update) {
                            tracing::warn!("Failed to apply relayed update: {}", e);
                        }
                    }
                    Ok(ServerMessage::Presence { client_id: other, state }) => {
                        reader_presence.apply_remote(other, Some(state));
                    }
                    Ok(ServerMessage::PresenceLeft { client_id: other }) => {
                        reader_presence.apply_remote(other, None);
                    }
                    Ok(ServerMessage::Error { message }) => {
                        tracing::warn!("Relay reported error: {}", message);
                    }
                    Err(e) => {
                        tracing::warn!("Invalid relay message: {}", e);
                    }
                }
            }
            reader_presence.clear_remote();
            set_status(&reader_status, reader_room.room_id(), ConnectionStatus::Disconnected);
        }));

        connection.set_status(ConnectionStatus::Connected);
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::presence::PresenceState;
    use std::time::Duration;
    use yrs::{Any, Map, Transact, Value};

    fn write(room: &SharedRoom, key: &str, value: &str) {
        let map = room.map("content");
        room.transact_local(|txn| {
            map.insert(txn, key, value);
        });
    }

    fn read(room: &SharedRoom, key: &str) -> Option<String> {
        let map = room.map("content");
        let txn = room.doc().transact();
        match map.get(&txn, key) {
            Some(Value::Any(Any::String(s))) => Some(s.to_string()),
            _ => None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn replica(room_id: &str) -> (Arc<SharedRoom>, Arc<Presence>) {
        (Arc::new(SharedRoom::new(room_id)), Arc::new(Presence::new(Uuid::new_v4())))
    }

    #[tokio::test]
    async fn test_local_connector_relays_updates() {
        let connector = LocalConnector::new(Arc::new(Hub::new()));
        let (room_a, presence_a) = replica("doc-1");
        let (room_b, presence_b) = replica("doc-1");

        let conn_a = connector.connect(Arc::clone(&room_a), presence_a).await.unwrap();
        let conn_b = connector.connect(Arc::clone(&room_b), presence_b).await.unwrap();
        assert_eq!(conn_a.status(), ConnectionStatus::Connected);
        assert_eq!(conn_b.status(), ConnectionStatus::Connected);

        write(&room_a, "k", "from a");
        settle().await;

        assert_eq!(read(&room_b, "k"), Some("from a".to_string()));
    }

    #[tokio::test]
    async fn test_late_joiner_receives_state() {
        let connector = LocalConnector::new(Arc::new(Hub::new()));
        let (room_a, presence_a) = replica("doc-1");
        let _conn_a = connector.connect(Arc::clone(&room_a), presence_a).await.unwrap();
        write(&room_a, "k", "early");
        settle().await;

        let (room_b, presence_b) = replica("doc-1");
        let _conn_b = connector.connect(Arc::clone(&room_b), presence_b).await.unwrap();
        assert_eq!(read(&room_b, "k"), Some("early".to_string()));
    }

    #[tokio::test]
    async fn test_offline_edits_merge_on_reconnect() {
        let connector = LocalConnector::new(Arc::new(Hub::new()));
        let (room_a, presence_a) = replica("doc-1");
        let (room_b, presence_b) = replica("doc-1");
        let conn_a = connector.connect(Arc::clone(&room_a), Arc::clone(&presence_a)).await.unwrap();
        let _conn_b = connector.connect(Arc::clone(&room_b), presence_b).await.unwrap();

        conn_a.disconnect().await;
        assert_eq!(conn_a.status(), ConnectionStatus::Disconnected);

        write(&room_a, "offline", "yes");
        settle().await;
        assert_eq!(read(&room_b, "offline"), None);

        let _conn_a = connector.connect(Arc::clone(&room_a), presence_a).await.unwrap();
        settle().await;
        assert_eq!(read(&room_b, "offline"), Some("yes".to_string()));
    }

    #[tokio::test]
    async fn test_presence_propagates() {
        let connector = LocalConnector::new(Arc::new(Hub::new()));
        let (room_a, presence_a) = replica("doc-1");
        let (room_b, presence_b) = replica("doc-1");
        let _conn_a = connector.connect(room_a, Arc::clone(&presence_a)).await.unwrap();
        let _conn_b = connector.connect(room_b, Arc::clone(&presence_b)).await.unwrap();

        presence_a.set_local_state(PresenceState::new(presence_a.client_id(), "Alice"));
        settle().await;

        let states = presence_b.get_states();
        assert_eq!(states.get(&presence_a.client_id()).map(|s| s.name.as_str()), Some("Alice"));
    }

    #[tokio::test]
    async fn test_eviction_marks_disconnected() {
        let hub = Arc::new(Hub::new());
        let connector = LocalConnector::new(Arc::clone(&hub));
        let (room, presence) = replica("doc-1");
        let conn = connector.connect(room, Arc::clone(&presence)).await.unwrap();
        let mut status = conn.status_changes();

        let relay = hub.get("doc-1").await.unwrap();
        assert!(relay.evict(presence.client_id()).await);

        tokio::time::timeout(Duration::from_secs(1), status.wait_for(|s| *s == ConnectionStatus::Disconnected))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_ws_room_url() {
        let connector = WsConnector::new("ws://localhost:3000/");
        let client = Uuid::nil();
        assert_eq!(
            connector.room_url("doc-1", client),
            format!("ws://localhost:3000/ws/doc-1?client_id={}", client)
        );
    }
}
