//! One open document
//!
//! A session connects the document's body room and the global block room,
//! wires the block registry, comment store and sync orchestrator to the
//! editor, autosaves the document and reconnects when a room drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::blocks::BlockRegistry;
use crate::comments::CommentThreadStore;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::models::SaveOutcome;
use crate::saver::DocumentSaver;
use crate::substrate::{ConnectionStatus, Connector, Presence, PresenceState, RoomConnection, SharedRoom};
use crate::sync::{EditorSurface, SyncOrchestrator};

/// Notifications surfaced to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Both rooms connected and every component wired
    Ready,
    /// A room changed connection status; `Disconnected` blocks editing
    Status { room: String, status: ConnectionStatus },
    Saved,
    /// A save failed; offer [`DocumentSession::retry_save`]
    SaveFailed { error: String },
}

/// Which of the two rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomKind {
    Body,
    Global,
}

struct RoomSlot {
    room: Arc<SharedRoom>,
    presence: Arc<Presence>,
    connection: Mutex<Option<RoomConnection>>,
}

impl RoomSlot {
    fn new(room_id: &str, client_id: Uuid) -> Self {
        Self {
            room: Arc::new(SharedRoom::new(room_id)),
            presence: Arc::new(Presence::new(client_id)),
            connection: Mutex::new(None),
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.connection
            .lock()
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, RoomConnection::status)
    }

    async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
    }
}

struct Inner<E: EditorSurface> {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    saver: Arc<dyn DocumentSaver>,
    editor: Arc<Mutex<E>>,
    registry: BlockRegistry,
    body: RoomSlot,
    global: RoomSlot,
    title: Mutex<String>,
    dirty: AtomicBool,
    closing: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl<E: EditorSurface> Inner<E> {
    fn slot(&self, kind: RoomKind) -> &RoomSlot {
        match kind {
            RoomKind::Body => &self.body,
            RoomKind::Global => &self.global,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn connect(&self, kind: RoomKind) -> Result<()> {
        let slot = self.slot(kind);
        let connection = self
            .connector
            .connect(Arc::clone(&slot.room), Arc::clone(&slot.presence))
            .await?;
        *slot.connection.lock() = Some(connection);

        if kind == RoomKind::Global {
            self.registry.initialize(Arc::clone(&slot.room));
        }
        self.emit(SessionEvent::Status {
            room: slot.room.room_id().to_string(),
            status: ConnectionStatus::Connected,
        });
        Ok(())
    }

    async fn save_now(&self) -> SaveOutcome {
        self.dirty.store(false, Ordering::SeqCst);

        let serialized = self.editor.lock().serialize();
        let content = match serialized {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(document_id = %self.config.document_id, "Failed to serialize document: {}", e);
                self.dirty.store(true, Ordering::SeqCst);
                self.emit(SessionEvent::SaveFailed {
                    error: e.to_string(),
                });
                return SaveOutcome::failed(e.to_string());
            }
        };
        let title = self.title.lock().clone();

        let outcome = self
            .saver
            .save_document(&self.config.document_id, &content, &title)
            .await;

        if outcome.success {
            tracing::debug!(document_id = %self.config.document_id, "Document saved");
            self.emit(SessionEvent::Saved);
        } else {
            let error = outcome.error.clone().unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(document_id = %self.config.document_id, "Document save failed: {}", error);
            self.dirty.store(true, Ordering::SeqCst);
            self.emit(SessionEvent::SaveFailed { error });
        }
        outcome
    }
}

/// An open document with its replicated state
pub struct DocumentSession<E: EditorSurface> {
    inner: Arc<Inner<E>>,
    comments: CommentThreadStore,
    orchestrator: SyncOrchestrator<E>,
    changes: mpsc::UnboundedSender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: EditorSurface> DocumentSession<E> {
    /// Connect both rooms and wire every component to `editor`
    pub async fn open(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        editor: E,
        saver: Arc<dyn DocumentSaver>,
    ) -> Result<Self> {
        let client_id = Uuid::new_v4();
        let (events, _) = broadcast::channel(64);
        let editor = Arc::new(Mutex::new(editor));

        let inner = Arc::new(Inner {
            body: RoomSlot::new(&config.document_id, client_id),
            global: RoomSlot::new(&config.global_room, client_id),
            title: Mutex::new(config.title.clone()),
            config,
            connector,
            saver,
            editor: Arc::clone(&editor),
            registry: BlockRegistry::new(),
            dirty: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            events,
        });

        inner
            .body
            .presence
            .set_local_state(PresenceState::new(client_id, inner.config.user.clone()));

        inner.connect(RoomKind::Body).await?;
        inner.connect(RoomKind::Global).await?;

        let comments = CommentThreadStore::new(Arc::clone(&inner.body.room));
        let orchestrator = SyncOrchestrator::new(
            inner.config.document_id.clone(),
            inner.registry.clone(),
            editor,
            inner.config.sync.clone(),
        );
        orchestrator.start();

        let (changes, rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(autosave(Arc::downgrade(&inner), rx)),
            tokio::spawn(supervise(Arc::downgrade(&inner), RoomKind::Body)),
            tokio::spawn(supervise(Arc::downgrade(&inner), RoomKind::Global)),
        ];

        tracing::info!(
            document_id = %inner.config.document_id,
            %client_id,
            user = %inner.config.user,
            "Document session ready"
        );
        inner.emit(SessionEvent::Ready);

        Ok(Self {
            inner,
            comments,
            orchestrator,
            changes,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn document_id(&self) -> &str {
        &self.inner.config.document_id
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.body.presence.client_id()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.inner.registry
    }

    pub fn comments(&self) -> &CommentThreadStore {
        &self.comments
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<E> {
        &self.orchestrator
    }

    pub fn editor(&self) -> &Arc<Mutex<E>> {
        &self.inner.editor
    }

    pub fn presence(&self) -> &Arc<Presence> {
        &self.inner.body.presence
    }

    /// Presence of everyone looking at this document, including us
    pub fn presence_states(&self) -> HashMap<Uuid, PresenceState> {
        self.inner.body.presence.get_states()
    }

    /// Status of the body room and the global room
    pub fn status(&self) -> (ConnectionStatus, ConnectionStatus) {
        (self.inner.body.status(), self.inner.global.status())
    }

    pub fn title(&self) -> String {
        self.inner.title.lock().clone()
    }

    /// Apply a local edit to the editor
    pub fn edit<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let result = f(&mut self.inner.editor.lock());
        self.after_selection();
        self.orchestrator.on_local_change();
        self.mark_dirty();
        result
    }

    /// Move the selection without changing content
    pub fn select<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let result = f(&mut self.inner.editor.lock());
        self.after_selection();
        result
    }

    fn after_selection(&self) {
        let active = self.orchestrator.on_selection_change();
        let cursor = self.inner.editor.lock().selection().map(|range| range.focus);
        self.inner.body.presence.set_cursor(cursor, active);
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        {
            let mut current = self.inner.title.lock();
            if *current == title {
                return;
            }
            *current = title;
        }
        self.mark_dirty();
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        let _ = self.changes.send(());
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Save immediately, e.g. after a failure was reported
    pub async fn retry_save(&self) -> SaveOutcome {
        self.inner.save_now().await
    }

    /// Flush pending work and disconnect
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        self.orchestrator.teardown();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        if self.has_unsaved_changes() {
            self.inner.save_now().await;
        }

        self.inner.registry.shutdown();
        self.inner.body.disconnect().await;
        self.inner.global.disconnect().await;

        tracing::info!(document_id = %self.inner.config.document_id, "Document session closed");
    }
}

impl<E: EditorSurface> Drop for DocumentSession<E> {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Save once changes stop arriving for the autosave window
async fn autosave<E: EditorSurface>(inner: Weak<Inner<E>>, mut changes: mpsc::UnboundedReceiver<()>) {
    let Some(window) = inner.upgrade().map(|inner| inner.config.autosave_debounce) else {
        return;
    };

    while changes.recv().await.is_some() {
        loop {
            match tokio::time::timeout(window, changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.dirty.load(Ordering::SeqCst) {
            inner.save_now().await;
        }
    }
}

/// Reconnect a room with exponential backoff whenever it drops
async fn supervise<E: EditorSurface>(inner: Weak<Inner<E>>, kind: RoomKind) {
    loop {
        let mut status = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let receiver = inner
                .slot(kind)
                .connection
                .lock()
                .as_ref()
                .map(RoomConnection::status_changes);
            match receiver {
                Some(receiver) => receiver,
                None => return,
            }
        };

        if status
            .wait_for(|s| *s == ConnectionStatus::Disconnected)
            .await
            .is_err()
        {
            return;
        }

        let Some(session) = inner.upgrade() else {
            return;
        };
        if session.closing.load(Ordering::SeqCst) {
            return;
        }

        let room_id = session.slot(kind).room.room_id().to_string();
        tracing::warn!(room = %room_id, "Room disconnected, reconnecting");
        session.emit(SessionEvent::Status {
            room: room_id.clone(),
            status: ConnectionStatus::Disconnected,
        });
        if kind == RoomKind::Global {
            session.registry.shutdown();
        }
        session.slot(kind).disconnect().await;

        let mut backoff = session.config.reconnect_initial_backoff;
        let max_backoff = session.config.reconnect_max_backoff;
        drop(session);

        loop {
            tokio::time::sleep(backoff).await;
            let Some(session) = inner.upgrade() else {
                return;
            };
            if session.closing.load(Ordering::SeqCst) {
                return;
            }

            session.emit(SessionEvent::Status {
                room: room_id.clone(),
                status: ConnectionStatus::Connecting,
            });
            match session.connect(kind).await {
                Ok(()) => {
                    tracing::info!(room = %room_id, "Room reconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(room = %room_id, ?backoff, "Reconnect failed: {}", e);
                    backoff = next_backoff(backoff, max_backoff);
                }
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
