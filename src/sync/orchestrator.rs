//! Bridge between an editing surface and the block registry
//!
//! Local edits inside a synchronized block are pushed to the registry after
//! a quiet period. Content arriving from the registry is applied back into
//! the surface as a quiet minimal edit, so it never re-enters the push path.
//!
//! Lock order: never hold the editor or the orchestrator state while
//! calling into the registry. Registry writes deliver callbacks
//! synchronously and those callbacks take both locks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::diff::minimal_edit;
use super::editor::{EditorSurface, InsertionPoint};
use crate::blocks::{BlockRegistry, BlockSubscription};
use crate::config::SyncConfig;
use crate::error::Result;

struct PendingPush {
    block_id: String,
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    active: Option<String>,
    pending: Option<PendingPush>,
    generation: u64,
    /// Last content pushed to or received from the registry, per block
    last_pushed: HashMap<String, String>,
    /// Blocks whose local text the registry refused; retried by the sweep
    unpushed: HashSet<String>,
    subscriptions: HashMap<String, BlockSubscription>,
    sweeper: Option<JoinHandle<()>>,
}

struct Shared<E> {
    document_id: String,
    registry: BlockRegistry,
    editor: Arc<Mutex<E>>,
    config: SyncConfig,
    state: Mutex<State>,
}

/// Outcome of one maintenance sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Blocks that got a new subscription
    pub subscribed: Vec<String>,
    /// Blocks removed from the surface because the registry lost them
    pub removed: Vec<String>,
    /// Subscriptions released because their node left the surface
    pub released: Vec<String>,
    /// Orphaned references the registry dropped before reconciling
    pub pruned: usize,
    /// Blocks whose held-back local text reached the registry
    pub repushed: Vec<String>,
}

pub struct SyncOrchestrator<E: EditorSurface> {
    shared: Arc<Shared<E>>,
}

impl<E: EditorSurface> Clone for SyncOrchestrator<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: EditorSurface> SyncOrchestrator<E> {
    pub fn new(
        document_id: impl Into<String>,
        registry: BlockRegistry,
        editor: Arc<Mutex<E>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                document_id: document_id.into(),
                registry,
                editor,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn editor(&self) -> &Arc<Mutex<E>> {
        &self.shared.editor
    }

    /// Run a first sweep and keep sweeping periodically
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                SyncOrchestrator { shared }.sweep();
            }
        });

        if let Some(previous) = self.shared.state.lock().sweeper.replace(handle) {
            previous.abort();
        }
    }

    pub fn active_block(&self) -> Option<String> {
        self.shared.state.lock().active.clone()
    }

    /// Re-evaluate which block the selection sits in
    pub fn on_selection_change(&self) -> Option<String> {
        let current = {
            let editor = self.shared.editor.lock();
            editor
                .selection()
                .and_then(|range| editor.enclosing_block(&range.focus))
                .map(|(_, block_id)| block_id)
        };

        let mut state = self.shared.state.lock();
        if state.active != current {
            tracing::debug!(
                document_id = %self.shared.document_id,
                from = ?state.active,
                to = ?current,
                "Active block changed"
            );
            state.active = current.clone();
        }
        current
    }

    /// Schedule a debounced push for the active block after a local edit
    pub fn on_local_change(&self) {
        let Some(block_id) = self.active_block() else {
            return;
        };

        // An edit in another block must not discard that block's pending push
        let superseded = {
            let mut state = self.shared.state.lock();
            match state.pending.take() {
                Some(pending) if pending.block_id != block_id => {
                    pending.handle.abort();
                    Some(pending.block_id)
                }
                Some(pending) => {
                    pending.handle.abort();
                    None
                }
                None => None,
            }
        };
        if let Some(other) = superseded {
            self.push(&other);
        }

        let mut state = self.shared.state.lock();
        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.config.push_debounce;
        let target = block_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_pending(weak, generation, target);
        });

        state.pending = Some(PendingPush {
            block_id,
            generation,
            handle,
        });
    }

    /// Push a pending edit immediately
    pub fn flush(&self) {
        let pending = self.shared.state.lock().pending.take();
        if let Some(pending) = pending {
            pending.handle.abort();
            self.push(&pending.block_id);
        }
    }

    pub fn has_pending_push(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Send the on-screen text of a block to the registry if it changed.
    ///
    /// A refused push keeps the block marked so the next sweep retries it
    /// before catching up. Returns whether the registry holds the text.
    fn push(&self, block_id: &str) -> bool {
        let Some(text) = self.shared.editor.lock().block_text(block_id) else {
            self.shared.state.lock().unpushed.remove(block_id);
            return true;
        };
        if self.shared.state.lock().last_pushed.get(block_id) == Some(&text) {
            self.shared.state.lock().unpushed.remove(block_id);
            return true;
        }

        match self.shared.registry.update_content(block_id, &text) {
            Ok(()) => {
                tracing::debug!(block_id, chars = text.chars().count(), "Pushed block content");
                let mut state = self.shared.state.lock();
                state.unpushed.remove(block_id);
                state.last_pushed.insert(block_id.to_string(), text);
                true
            }
            Err(e) => {
                tracing::warn!(block_id, "Failed to push block content, keeping it for retry: {}", e);
                self.shared.state.lock().unpushed.insert(block_id.to_string());
                false
            }
        }
    }

    pub fn has_unpushed(&self, block_id: &str) -> bool {
        self.shared.state.lock().unpushed.contains(block_id)
    }

    /// Reconcile subscriptions and block nodes with the registry
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        // Orphans must go before the liveness check so their nodes are removed
        match self.shared.registry.prune_orphans() {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => {
                tracing::debug!(document_id = %self.shared.document_id, "Skipping sweep: {}", e);
                return report;
            }
        }

        let present = self.shared.editor.lock().block_ids();

        let mut live = Vec::with_capacity(present.len());
        for block_id in &present {
            match self.shared.registry.get_info(block_id) {
                Ok(Some(_)) => live.push(block_id.clone()),
                Ok(None) => report.removed.push(block_id.clone()),
                Err(e) => {
                    tracing::debug!(document_id = %self.shared.document_id, "Skipping sweep: {}", e);
                    return report;
                }
            }
        }

        let retry: Vec<String> = {
            let state = self.shared.state.lock();
            live.iter().filter(|id| state.unpushed.contains(*id)).cloned().collect()
        };
        for block_id in retry {
            if self.push(&block_id) {
                report.repushed.push(block_id);
            }
        }

        for block_id in &live {
            let subscribed = self
                .shared
                .state
                .lock()
                .subscriptions
                .get(block_id)
                .is_some_and(BlockSubscription::is_active);
            if subscribed {
                continue;
            }
            match self.watch(block_id) {
                Ok(()) => {
                    self.catch_up(block_id);
                    report.subscribed.push(block_id.clone());
                }
                Err(e) => tracing::warn!(block_id = %block_id, "Failed to subscribe: {}", e),
            }
        }

        if !report.removed.is_empty() {
            let mut editor = self.shared.editor.lock();
            for block_id in &report.removed {
                editor.remove_block(block_id);
            }
        }

        let live: HashSet<&String> = live.iter().collect();
        {
            let mut state = self.shared.state.lock();
            let stale: Vec<String> = state
                .subscriptions
                .keys()
                .filter(|block_id| !live.contains(block_id))
                .cloned()
                .collect();
            for block_id in &stale {
                state.subscriptions.remove(block_id);
                state.last_pushed.remove(block_id);
            }
            state.unpushed.retain(|block_id| live.contains(block_id));
            if state
                .active
                .as_ref()
                .is_some_and(|active| report.removed.contains(active))
            {
                state.active = None;
            }
            report.released = stale;
        }

        if report != SweepReport::default() {
            tracing::debug!(
                document_id = %self.shared.document_id,
                pruned = report.pruned,
                repushed = report.repushed.len(),
                subscribed = report.subscribed.len(),
                removed = report.removed.len(),
                released = report.released.len(),
                "Block sweep reconciled"
            );
        }
        report
    }

    /// Subscribe to registry changes of a block shown in this editor
    fn watch(&self, block_id: &str) -> Result<()> {
        let weak: Weak<Shared<E>> = Arc::downgrade(&self.shared);
        let subscription = self.shared.registry.subscribe(
            block_id,
            Arc::new(move |id: &str, content: &str| {
                if let Some(shared) = weak.upgrade() {
                    SyncOrchestrator { shared }.apply_remote(id, content);
                }
            }),
        )?;
        self.shared
            .state
            .lock()
            .subscriptions
            .insert(block_id.to_string(), subscription);
        Ok(())
    }

    /// Bring a newly watched block up to the registry's content
    fn catch_up(&self, block_id: &str) {
        if self.has_unpushed(block_id) {
            tracing::debug!(block_id, "Skipping catch-up over unpushed text");
            return;
        }
        match self.shared.registry.get_content(block_id) {
            Ok(content) => self.apply_remote(block_id, &content),
            Err(e) => tracing::debug!(block_id, "Skipping catch-up: {}", e),
        }
    }

    /// Apply registry content to the surface as a quiet minimal edit
    fn apply_remote(&self, block_id: &str, content: &str) {
        {
            let mut editor = self.shared.editor.lock();
            let Some(current) = editor.block_text(block_id) else {
                return;
            };
            if let Some(edit) = minimal_edit(&current, content) {
                tracing::trace!(block_id, offset = edit.offset, delete = edit.delete, "Applying remote block edit");
                editor.apply_quiet_edit(block_id, &edit);
            }
        }
        self.shared
            .state
            .lock()
            .last_pushed
            .insert(block_id.to_string(), content.to_string());
    }

    /// Where a new block would be inserted for the current selection
    pub fn insertion_point(&self) -> InsertionPoint {
        let editor = self.shared.editor.lock();
        let Some(selection) = editor.selection() else {
            return InsertionPoint::End;
        };
        let point = selection.focus;

        if let Some((block_path, _)) = editor.enclosing_block(&point) {
            return InsertionPoint::After(block_path);
        }

        match editor.leaf_len(&point) {
            Some(len) if point.offset > 0 && point.offset < len => InsertionPoint::Split(point),
            Some(_) if point.path.len() > 1 => {
                InsertionPoint::After(point.path[..point.path.len() - 1].to_vec())
            }
            Some(_) => InsertionPoint::After(point.path),
            None => InsertionPoint::End,
        }
    }

    /// Create a new main block and insert it at the insertion point
    pub fn insert_new_block(&self) -> Result<String> {
        let block_id = self.shared.registry.create_main(&self.shared.document_id)?;
        self.place(&block_id, "")?;
        tracing::info!(document_id = %self.shared.document_id, block_id = %block_id, "Inserted new block");
        Ok(block_id)
    }

    /// Create a reference to `main_id` and insert it at the insertion point
    pub fn insert_reference(&self, main_id: &str) -> Result<String> {
        let block_id = self
            .shared
            .registry
            .create_reference(main_id, &self.shared.document_id)?;
        let content = self.shared.registry.get_content(&block_id)?;
        self.place(&block_id, &content)?;
        tracing::info!(document_id = %self.shared.document_id, block_id = %block_id, main_id, "Inserted block reference");
        Ok(block_id)
    }

    fn place(&self, block_id: &str, content: &str) -> Result<()> {
        let at = self.insertion_point();
        self.shared.editor.lock().insert_block(&at, block_id, content);
        self.shared
            .state
            .lock()
            .last_pushed
            .insert(block_id.to_string(), content.to_string());
        self.watch(block_id)
    }

    /// Flush any pending push, then release every subscription and task
    pub fn teardown(&self) {
        self.flush();

        let mut state = self.shared.state.lock();
        if let Some(sweeper) = state.sweeper.take() {
            sweeper.abort();
        }
        let released = state.subscriptions.len();
        state.subscriptions.clear();
        state.last_pushed.clear();
        state.unpushed.clear();
        state.active = None;

        tracing::debug!(document_id = %self.shared.document_id, released, "Sync orchestrator torn down");
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.state.lock().subscriptions.len()
    }
}

fn fire_pending<E: EditorSurface>(weak: Weak<Shared<E>>, generation: u64, block_id: String) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    {
        let mut state = shared.state.lock();
        match &state.pending {
            Some(pending) if pending.generation == generation => state.pending = None,
            _ => return,
        }
    }
    SyncOrchestrator { shared }.push(&block_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::{TextPoint, TextRange};
    use crate::substrate::SharedRoom;
    use crate::sync::editor::{EditorDocument, Node};

    fn registry() -> BlockRegistry {
        let registry = BlockRegistry::new();
        registry.initialize(Arc::new(SharedRoom::new("global-blocks")));
        registry
    }

    fn orchestrator(registry: &BlockRegistry, nodes: Vec<Node>) -> SyncOrchestrator<EditorDocument> {
        SyncOrchestrator::new(
            "doc-1",
            registry.clone(),
            Arc::new(Mutex::new(EditorDocument::from_nodes(nodes))),
            SyncConfig::default(),
        )
    }

    fn type_at(orch: &SyncOrchestrator<EditorDocument>, point: TextPoint, text: &str) {
        {
            let mut editor = orch.editor().lock();
            editor.set_selection(Some(TextRange::collapsed(point.clone())));
            editor.insert_text(&point, text);
        }
        orch.on_selection_change();
        orch.on_local_change();
    }

    #[tokio::test]
    async fn test_selection_tracks_enclosing_block() {
        let registry = registry();
        let orch = orchestrator(
            &registry,
            vec![Node::paragraph("plain"), Node::sync_block("main-1", "block")],
        );

        orch.editor()
            .lock()
            .set_selection(Some(TextRange::collapsed(TextPoint::new(vec![1, 0], 2))));
        assert_eq!(orch.on_selection_change().as_deref(), Some("main-1"));
        assert_eq!(orch.active_block().as_deref(), Some("main-1"));

        orch.editor()
            .lock()
            .set_selection(Some(TextRange::collapsed(TextPoint::new(vec![0, 0], 2))));
        assert!(orch.on_selection_change().is_none());
        assert!(orch.active_block().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_edits() {
        let registry = registry();
        let main = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "")]);

        type_at(&orch, TextPoint::new(vec![0, 0], 0), "a");
        tokio::time::sleep(Duration::from_millis(600)).await;
        type_at(&orch, TextPoint::new(vec![0, 0], 1), "b");
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The second edit restarted the window
        assert_eq!(registry.get_content(&main).unwrap(), "");
        assert!(orch.has_pending_push());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.get_content(&main).unwrap(), "ab");
        assert!(!orch.has_pending_push());
    }

    #[tokio::test]
    async fn test_edits_outside_blocks_are_not_pushed() {
        let registry = registry();
        let orch = orchestrator(&registry, vec![Node::paragraph("free text")]);
        type_at(&orch, TextPoint::new(vec![0, 0], 0), "more ");
        assert!(!orch.has_pending_push());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_content_applies_quietly() {
        let registry = registry();
        let main = registry.create_main("doc-1").unwrap();
        registry.update_content(&main, "The quick fox").unwrap();
        let reference = registry.create_reference(&main, "doc-1").unwrap();

        let orch = orchestrator(&registry, vec![Node::sync_block(&reference, "The quick fox")]);
        let report = orch.sweep();
        assert_eq!(report.subscribed, vec![reference.clone()]);

        registry.update_content(&main, "The quick brown fox").unwrap();

        let editor = orch.editor().lock();
        assert_eq!(editor.block_text(&reference).as_deref(), Some("The quick brown fox"));
        assert_eq!(editor.history_len(), 0);
        drop(editor);
        assert!(!orch.has_pending_push());
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_content_is_not_pushed_back() {
        let registry = registry();
        let main = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "")]);
        orch.sweep();

        let reference = registry.create_reference(&main, "doc-2").unwrap();
        registry.update_content(&reference, "from elsewhere").unwrap();

        orch.editor()
            .lock()
            .set_selection(Some(TextRange::collapsed(TextPoint::new(vec![0, 0], 0))));
        orch.on_selection_change();
        orch.on_local_change();
        orch.flush();

        // Nothing new was typed, so the flush finds the last received text
        assert_eq!(registry.get_content(&main).unwrap(), "from elsewhere");
    }

    #[tokio::test]
    async fn test_sweep_removes_blocks_deleted_elsewhere() {
        let registry = registry();
        let kept = registry.create_main("doc-1").unwrap();
        let doomed = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(
            &registry,
            vec![Node::sync_block(&kept, ""), Node::sync_block(&doomed, "")],
        );
        orch.sweep();
        assert_eq!(orch.subscription_count(), 2);

        registry.delete_block(&doomed).unwrap();
        let report = orch.sweep();

        assert_eq!(report.removed, vec![doomed.clone()]);
        assert_eq!(report.released, vec![doomed.clone()]);
        assert_eq!(orch.editor().lock().block_ids(), vec![kept]);
        assert_eq!(orch.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_catches_up_stale_text() {
        let registry = registry();
        let main = registry.create_main("doc-1").unwrap();
        registry.update_content(&main, "current").unwrap();

        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "stale")]);
        orch.sweep();
        assert_eq!(orch.editor().lock().block_text(&main).as_deref(), Some("current"));
    }

    #[tokio::test]
    async fn test_sweep_resubscribes_after_registry_restart() {
        let registry = registry();
        let room = Arc::new(SharedRoom::new("global-blocks"));
        registry.initialize(Arc::clone(&room));
        let main = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "")]);
        orch.sweep();

        registry.shutdown();
        assert!(orch.sweep().subscribed.is_empty());

        registry.initialize(room);
        assert_eq!(orch.sweep().subscribed, vec![main]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_typed_while_disconnected_survives_reconnect() {
        let registry = registry();
        let room = Arc::new(SharedRoom::new("global-blocks"));
        registry.initialize(Arc::clone(&room));
        let main = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "")]);
        orch.sweep();

        type_at(&orch, TextPoint::new(vec![0, 0], 0), "typed before drop");
        registry.shutdown();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!orch.has_pending_push());
        assert!(orch.has_unpushed(&main));

        registry.initialize(room);
        let report = orch.sweep();

        assert_eq!(report.repushed, vec![main.clone()]);
        assert_eq!(report.subscribed, vec![main.clone()]);
        assert!(!orch.has_unpushed(&main));
        assert_eq!(
            orch.editor().lock().block_text(&main).as_deref(),
            Some("typed before drop")
        );
        assert_eq!(registry.get_content(&main).unwrap(), "typed before drop");
    }

    #[tokio::test]
    async fn test_sweep_prunes_orphaned_references() {
        let alice_room = Arc::new(SharedRoom::new("global-blocks"));
        let bob_room = Arc::new(SharedRoom::new("global-blocks"));
        let alice = BlockRegistry::new();
        alice.initialize(Arc::clone(&alice_room));
        let bob = BlockRegistry::new();
        bob.initialize(Arc::clone(&bob_room));

        let main = alice.create_main("doc-1").unwrap();
        bob_room.apply_remote(&alice_room.encode_state()).unwrap();

        // Concurrently: alice deletes the main, bob references it
        alice.delete_block(&main).unwrap();
        let orphan = bob.create_reference(&main, "doc-2").unwrap();
        bob_room.apply_remote(&alice_room.encode_state()).unwrap();
        alice_room.apply_remote(&bob_room.encode_state()).unwrap();
        assert!(bob.get_info(&orphan).unwrap().is_some());

        let orch = orchestrator(
            &bob,
            vec![Node::paragraph("kept"), Node::sync_block(&orphan, "")],
        );
        let report = orch.sweep();

        assert_eq!(report.pruned, 1);
        assert_eq!(report.removed, vec![orphan.clone()]);
        assert!(report.subscribed.is_empty());
        assert!(bob.get_info(&orphan).unwrap().is_none());
        assert!(orch.editor().lock().block_ids().is_empty());
        assert_eq!(orch.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_insertion_point_policy() {
        let registry = registry();
        let orch = orchestrator(
            &registry,
            vec![Node::paragraph("Hello world"), Node::sync_block("main-1", "x")],
        );
        let select = |path: Vec<usize>, offset| {
            orch.editor()
                .lock()
                .set_selection(Some(TextRange::collapsed(TextPoint::new(path, offset))));
        };

        assert_eq!(orch.insertion_point(), InsertionPoint::End);

        select(vec![1, 0], 1);
        assert_eq!(orch.insertion_point(), InsertionPoint::After(vec![1]));

        select(vec![0, 0], 5);
        assert_eq!(
            orch.insertion_point(),
            InsertionPoint::Split(TextPoint::new(vec![0, 0], 5))
        );

        select(vec![0, 0], 11);
        assert_eq!(orch.insertion_point(), InsertionPoint::After(vec![0]));
    }

    #[tokio::test]
    async fn test_insert_new_block_and_reference() {
        let registry = registry();
        let orch = orchestrator(&registry, vec![Node::paragraph("Hello world")]);
        orch.editor()
            .lock()
            .set_selection(Some(TextRange::collapsed(TextPoint::new(vec![0, 0], 11))));

        let main = orch.insert_new_block().unwrap();
        type_at(&orch, TextPoint::new(vec![1, 0], 0), "shared");
        orch.flush();
        assert_eq!(registry.get_content(&main).unwrap(), "shared");

        let reference = orch.insert_reference(&main).unwrap();
        let editor = orch.editor().lock();
        assert_eq!(editor.block_ids(), vec![main.clone(), reference.clone()]);
        assert_eq!(editor.block_text(&main).as_deref(), Some("shared"));
        assert_eq!(editor.block_text(&reference).as_deref(), Some("shared"));
        drop(editor);
        assert_eq!(orch.subscription_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_flushes_pending_push() {
        let registry = registry();
        let main = registry.create_main("doc-1").unwrap();
        let orch = orchestrator(&registry, vec![Node::sync_block(&main, "")]);
        orch.start();
        tokio::task::yield_now().await;

        type_at(&orch, TextPoint::new(vec![0, 0], 0), "unsaved");
        orch.teardown();

        assert_eq!(registry.get_content(&main).unwrap(), "unsaved");
        assert_eq!(orch.subscription_count(), 0);
        assert!(!orch.has_pending_push());
    }
}
