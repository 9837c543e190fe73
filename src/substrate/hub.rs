//! Relay rooms for fanning updates out between replicas
//!
//! A relay room keeps its own replica of the room so late joiners can be
//! handed the full state, tracks the presence of connected clients and
//! broadcasts every update and presence change to all subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::presence::PresenceState;
use super::room::SharedRoom;
use crate::error::Result;

/// Events fanned out to every client of a relay room
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A replicated update (binary, Yrs v1 encoding)
    Update {
        /// The client that produced it
        source: Uuid,
        update: Vec<u8>,
    },
    /// A client's presence changed; `None` means it left
    Presence {
        client_id: Uuid,
        state: Option<PresenceState>,
    },
    /// The relay dropped a client; its link must close
    Evicted { client_id: Uuid },
}

/// What a client receives when it joins a relay room
pub struct JoinHandshake {
    /// Full room state as a single update
    pub state: Vec<u8>,
    /// Presence of clients already in the room
    pub presence: Vec<(Uuid, PresenceState)>,
    pub events: broadcast::Receiver<RelayEvent>,
}

pub struct RelayRoom {
    room_id: String,
    replica: SharedRoom,
    clients: RwLock<HashMap<Uuid, Option<PresenceState>>>,
    event_tx: broadcast::Sender<RelayEvent>,
}

impl RelayRoom {
    pub fn new(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            replica: SharedRoom::new(room_id.clone()),
            room_id,
            clients: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The relay's own replica of the room
    pub fn replica(&self) -> &SharedRoom {
        &self.replica
    }

    /// Register a client and hand it the current state
    pub async fn join(&self, client_id: Uuid) -> JoinHandshake {
        // Subscribe before snapshotting so nothing falls in between;
        // re-applying an update the snapshot already holds is a no-op.
        let events = self.event_tx.subscribe();
        let state = self.replica.encode_state();

        let mut clients = self.clients.write().await;
        let presence = clients
            .iter()
            .filter_map(|(id, state)| state.clone().map(|s| (*id, s)))
            .collect();
        clients.insert(client_id, None);

        tracing::debug!(room = %self.room_id, %client_id, "Client joined relay room");

        JoinHandshake {
            state,
            presence,
            events,
        }
    }

    /// Remove a client and tell the others it left
    pub async fn leave(&self, client_id: Uuid) -> bool {
        let removed = self.clients.write().await.remove(&client_id).is_some();
        if removed {
            tracing::debug!(room = %self.room_id, %client_id, "Client left relay room");
            let _ = self.event_tx.send(RelayEvent::Presence {
                client_id,
                state: None,
            });
        }
        removed
    }

    /// Drop a client from the room and close its link
    pub async fn evict(&self, client_id: Uuid) -> bool {
        let removed = self.leave(client_id).await;
        if removed {
            tracing::info!(room = %self.room_id, %client_id, "Evicted client from relay room");
            let _ = self.event_tx.send(RelayEvent::Evicted { client_id });
        }
        removed
    }

    /// Evict every connected client
    pub async fn evict_all(&self) -> usize {
        let clients: Vec<Uuid> = self.clients.read().await.keys().copied().collect();
        let mut evicted = 0;
        for client_id in clients {
            if self.evict(client_id).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Merge an update from a client and broadcast it
    pub async fn apply_update(&self, source: Uuid, update: &[u8]) -> Result<()> {
        self.replica.apply_remote(update)?;

        let _ = self.event_tx.send(RelayEvent::Update {
            source,
            update: update.to_vec(),
        });

        Ok(())
    }

    /// Record a client's presence and broadcast it
    pub async fn set_presence(&self, client_id: Uuid, state: PresenceState) {
        self.clients
            .write()
            .await
            .insert(client_id, Some(state.clone()));

        let _ = self.event_tx.send(RelayEvent::Presence {
            client_id,
            state: Some(state),
        });
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

/// Manager for all active relay rooms
pub struct Hub {
    rooms: RwLock<HashMap<String, Arc<RelayRoom>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a relay room
    pub async fn get_or_create(&self, room_id: &str) -> Arc<RelayRoom> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }

        let room = Arc::new(RelayRoom::new(room_id));
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<RelayRoom>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Remove rooms nobody is connected to
    pub async fn cleanup_empty_rooms(&self) {
        let mut rooms = self.rooms.write().await;
        let mut empty = Vec::new();
        for (room_id, room) in rooms.iter() {
            if room.is_empty().await {
                empty.push(room_id.clone());
            }
        }

        for room_id in empty {
            rooms.remove(&room_id);
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
