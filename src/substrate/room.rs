//! Replica of one shared room
//!
//! Wraps a Yrs document. Local writes go through [`SharedRoom::transact_local`]
//! so the incremental update can be published to peers; updates received
//! from peers go through [`SharedRoom::apply_remote`] and are never
//! re-published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, MapRef, ReadTxn, StateVector, Transact, TransactionMut, Update};

use crate::error::{CollabError, Result};

/// Callback run after a remote update has been committed
pub type ApplyHook = Arc<dyn Fn() + Send + Sync>;

/// Handle for removing an apply hook
pub type HookId = u64;

pub struct SharedRoom {
    room_id: String,
    doc: Doc,
    outbound: broadcast::Sender<Vec<u8>>,
    hooks: Mutex<Vec<(HookId, ApplyHook)>>,
    next_hook: AtomicU64,
}

impl SharedRoom {
    /// Create an empty replica
    pub fn new(room_id: impl Into<String>) -> Self {
        let (outbound, _) = broadcast::channel(256);
        Self {
            room_id: room_id.into(),
            doc: Doc::new(),
            outbound,
            hooks: Mutex::new(Vec::new()),
            next_hook: AtomicU64::new(1),
        }
    }

    /// Create a replica seeded from a full state update
    pub fn from_update(room_id: impl Into<String>, update: &[u8]) -> Result<Self> {
        let room = Self::new(room_id);
        room.apply_quiet(update)?;
        Ok(room)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Get the underlying Yrs document
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Get a root-level map, creating it if needed.
    ///
    /// Must not be called while a transaction on this room is open.
    pub fn map(&self, name: &str) -> MapRef {
        self.doc.get_or_insert_map(name)
    }

    /// Run a local write transaction and publish the resulting update
    pub fn transact_local<R>(&self, f: impl FnOnce(&mut TransactionMut<'_>) -> R) -> R {
        let before = self.state_vector_raw();

        let result = {
            let mut txn = self.doc.transact_mut();
            f(&mut txn)
        };

        let update = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(&before)
        };
        // No receivers just means nobody is connected yet
        let _ = self.outbound.send(update);

        result
    }

    /// Apply an update received from a peer, then run the apply hooks
    pub fn apply_remote(&self, update: &[u8]) -> Result<()> {
        self.apply_quiet(update)?;
        self.run_apply_hooks();
        Ok(())
    }

    fn apply_quiet(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| {
            tracing::warn!(room = %self.room_id, "Dropping undecodable update: {}", e);
            CollabError::Decode(e.to_string())
        })?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded);
        Ok(())
    }

    fn run_apply_hooks(&self) {
        let hooks: Vec<ApplyHook> = self.hooks.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for hook in hooks {
            hook();
        }
    }

    /// Register a callback run after every remote update
    pub fn add_apply_hook(&self, hook: ApplyHook) -> HookId {
        let id = self.next_hook.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().push((id, hook));
        id
    }

    pub fn remove_apply_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Receive every update produced by local writes
    pub fn outbound(&self) -> broadcast::Receiver<Vec<u8>> {
        self.outbound.subscribe()
    }

    /// Get the full state as a binary update
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Get the encoded state vector (for the sync handshake)
    pub fn state_vector(&self) -> Vec<u8> {
        self.state_vector_raw().encode_v1()
    }

    fn state_vector_raw(&self) -> StateVector {
        let txn = self.doc.transact();
        txn.state_vector()
    }

    /// Compute the update a peer with the given state vector is missing
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| CollabError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use yrs::{Any, Map, Value};

    fn read_string(room: &SharedRoom, map: &str, key: &str) -> Option<String> {
        let map = room.map(map);
        let txn = room.doc().transact();
        match map.get(&txn, key) {
            Some(Value::Any(Any::String(s))) => Some(s.to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_local_write_is_published() {
        let room = SharedRoom::new("room-a");
        let mut outbound = room.outbound();
        let map = room.map("content");

        room.transact_local(|txn| {
            map.insert(txn, "k", "v");
        });

        let update = outbound.try_recv().unwrap();
        let replica = SharedRoom::from_update("room-a", &update).unwrap();
        assert_eq!(read_string(&replica, "content", "k"), Some("v".to_string()));
    }

    #[test]
    fn test_remote_apply_is_not_republished() {
        let source = SharedRoom::new("room-a");
        let map = source.map("content");
        source.transact_local(|txn| {
            map.insert(txn, "k", "v");
        });

        let target = SharedRoom::new("room-a");
        let mut outbound = target.outbound();
        target.apply_remote(&source.encode_state()).unwrap();

        assert!(outbound.try_recv().is_err());
        assert_eq!(read_string(&target, "content", "k"), Some("v".to_string()));
    }

    #[test]
    fn test_apply_hooks_run_after_remote_update() {
        let source = SharedRoom::new("room-a");
        let map = source.map("content");
        source.transact_local(|txn| {
            map.insert(txn, "k", "v");
        });

        let target = SharedRoom::new("room-a");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook = target.add_apply_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        target.apply_remote(&source.encode_state()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(target.remove_apply_hook(hook));
        target.apply_remote(&source.encode_state()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encode_diff_from_state_vector() {
        let source = SharedRoom::new("room-a");
        let map = source.map("content");
        source.transact_local(|txn| {
            map.insert(txn, "k", "initial");
        });

        let target = SharedRoom::new("room-a");
        let diff = source.encode_diff(&target.state_vector()).unwrap();
        target.apply_remote(&diff).unwrap();
        assert_eq!(read_string(&target, "content", "k"), Some("initial".to_string()));
    }

    #[test]
    fn test_garbage_update_is_rejected() {
        let room = SharedRoom::new("room-a");
        let err = room.apply_remote(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CollabError::Decode(_)));
    }
}
