//! Registry of synchronized blocks
//!
//! Block metadata and content live in the global room:
//! - map `blocks`: block id -> nested map (`role`, `mainId`, `documentId`,
//!   `createdAt`, `updatedAt`, and on mains a nested `refs` map used as a set)
//! - map `content`: block id -> string
//!
//! Content is an atomic last-writer-wins value per block. A write to any
//! block of a group (one main plus its references) is copied to every other
//! member of the group in the same transaction.
//!
//! Subscribers are notified once a transaction has committed, after every
//! local write and after every update applied from a peer, so callbacks may
//! read the registry. Delivery compares the content of each watched block
//! with the last content its subscribers saw.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;
use yrs::{Any, Map, MapPrelim, MapRef, ReadTxn, Transact, Value};

use crate::error::{CollabError, Result};
use crate::models::{BlockMeta, BlockRole};
use crate::substrate::room::{HookId, SharedRoom};

const BLOCKS_MAP: &str = "blocks";
const CONTENT_MAP: &str = "content";

const FIELD_ROLE: &str = "role";
const FIELD_MAIN_ID: &str = "mainId";
const FIELD_DOCUMENT_ID: &str = "documentId";
const FIELD_CREATED_AT: &str = "createdAt";
const FIELD_UPDATED_AT: &str = "updatedAt";
const FIELD_REFS: &str = "refs";

/// Callback receiving `(block_id, new_content)`
pub type BlockCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct Attached {
    room: Arc<SharedRoom>,
    hook: HookId,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_block: HashMap<String, Vec<(u64, BlockCallback)>>,
}

impl Subscribers {
    fn contains(&self, block_id: &str, id: u64) -> bool {
        self.by_block
            .get(block_id)
            .is_some_and(|entries| entries.iter().any(|(sub_id, _)| *sub_id == id))
    }

    fn remove(&mut self, block_id: &str, id: u64) {
        if let Some(entries) = self.by_block.get_mut(block_id) {
            entries.retain(|(sub_id, _)| *sub_id != id);
            if entries.is_empty() {
                self.by_block.remove(block_id);
            }
        }
    }
}

struct Shared {
    attached: RwLock<Option<Attached>>,
    subscribers: Mutex<Subscribers>,
    /// Content last seen by the subscribers of each watched block
    seen: Mutex<HashMap<String, String>>,
    /// Last timestamp handed out, in milliseconds
    clock: Mutex<i64>,
}

impl Shared {
    fn room(&self) -> Result<Arc<SharedRoom>> {
        self.attached
            .read()
            .as_ref()
            .map(|attached| Arc::clone(&attached.room))
            .ok_or(CollabError::NotInitialized)
    }

    fn tick(&self) -> i64 {
        let mut last = self.clock.lock();
        let now = Utc::now().timestamp_millis();
        *last = if now > *last { now } else { *last + 1 };
        *last
    }

    /// Deliver content changes of watched blocks, skipping `exclude` (the
    /// block the current call wrote itself)
    fn deliver(&self, exclude: Option<&str>) {
        let room = match self.room() {
            Ok(room) => room,
            Err(_) => return,
        };
        let contents = room.map(CONTENT_MAP);

        let deliveries: Vec<(String, String, Vec<BlockCallback>)> = {
            let subscribers = self.subscribers.lock();
            let mut seen = self.seen.lock();
            let txn = room.doc().transact();

            let mut deliveries = Vec::new();
            for (block_id, entries) in &subscribers.by_block {
                let Some(content) = read_content(&contents, &txn, block_id) else {
                    seen.remove(block_id);
                    continue;
                };
                if seen.get(block_id) == Some(&content) {
                    continue;
                }
                seen.insert(block_id.clone(), content.clone());
                if Some(block_id.as_str()) == exclude {
                    continue;
                }
                let callbacks = entries.iter().map(|(_, cb)| Arc::clone(cb)).collect();
                deliveries.push((block_id.clone(), content, callbacks));
            }
            deliveries
        };

        for (block_id, content, callbacks) in deliveries {
            tracing::debug!(block_id = %block_id, subscribers = callbacks.len(), "Delivering block content change");
            for callback in callbacks {
                callback(&block_id, &content);
            }
        }
    }
}

/// Façade over the blocks and content maps of the global room.
///
/// Cheap to clone; clones share the subscriber index and attachment.
#[derive(Clone)]
pub struct BlockRegistry {
    shared: Arc<Shared>,
}

impl BlockRegistry {
    /// Create a detached registry; every call fails with `NotInitialized`
    /// until [`BlockRegistry::initialize`] is called
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                attached: RwLock::new(None),
                subscribers: Mutex::new(Subscribers::default()),
                seen: Mutex::new(HashMap::new()),
                clock: Mutex::new(0),
            }),
        }
    }

    /// Attach to the replica of the global room
    pub fn initialize(&self, room: Arc<SharedRoom>) {
        self.detach();

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let hook = room.add_apply_hook(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(None);
            }
        }));

        tracing::info!(room = %room.room_id(), "Block registry initialized");
        *self.shared.attached.write() = Some(Attached { room, hook });
    }

    /// Detach from the substrate and drop every subscription
    pub fn shutdown(&self) {
        self.detach();
        self.shared.subscribers.lock().by_block.clear();
        self.shared.seen.lock().clear();
    }

    fn detach(&self) {
        if let Some(attached) = self.shared.attached.write().take() {
            attached.room.remove_apply_hook(attached.hook);
            tracing::info!(room = %attached.room.room_id(), "Block registry detached");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.attached.read().is_some()
    }

    /// Apply a peer update to the global room and deliver the changes
    pub fn apply_remote(&self, update: &[u8]) -> Result<()> {
        self.shared.room()?.apply_remote(update)
    }

    /// Create a new main block with empty content
    pub fn create_main(&self, document_id: &str) -> Result<String> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let contents = room.map(CONTENT_MAP);
        let id = new_block_id(BlockRole::Main);
        let now = self.shared.tick();

        room.transact_local(|txn| {
            let entry = blocks.insert(txn, id.as_str(), MapPrelim::<Any>::new());
            entry.insert(txn, FIELD_ROLE, BlockRole::Main.as_str());
            entry.insert(txn, FIELD_DOCUMENT_ID, document_id);
            entry.insert(txn, FIELD_CREATED_AT, Any::BigInt(now));
            entry.insert(txn, FIELD_UPDATED_AT, Any::BigInt(now));
            entry.insert(txn, FIELD_REFS, MapPrelim::<Any>::new());
            contents.insert(txn, id.as_str(), "");
        });
        self.shared.deliver(Some(&id));

        tracing::debug!(block_id = %id, document_id, "Created main block");
        Ok(id)
    }

    /// Create a reference mirroring `main_id`, seeded with its current content
    pub fn create_reference(&self, main_id: &str, document_id: &str) -> Result<String> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let contents = room.map(CONTENT_MAP);

        let content = {
            let txn = room.doc().transact();
            match read_meta(&blocks, &txn, main_id) {
                Some(meta) if meta.is_main() => read_content(&contents, &txn, main_id).unwrap_or_default(),
                _ => return Err(CollabError::MainNotFound(main_id.to_string())),
            }
        };

        let id = new_block_id(BlockRole::Reference);
        let now = self.shared.tick();

        room.transact_local(|txn| {
            let entry = blocks.insert(txn, id.as_str(), MapPrelim::<Any>::new());
            entry.insert(txn, FIELD_ROLE, BlockRole::Reference.as_str());
            entry.insert(txn, FIELD_MAIN_ID, main_id);
            entry.insert(txn, FIELD_DOCUMENT_ID, document_id);
            entry.insert(txn, FIELD_CREATED_AT, Any::BigInt(now));
            entry.insert(txn, FIELD_UPDATED_AT, Any::BigInt(now));
            contents.insert(txn, id.as_str(), content.as_str());

            if let Some(Value::YMap(main)) = blocks.get(&*txn, main_id) {
                let refs = match main.get(&*txn, FIELD_REFS) {
                    Some(Value::YMap(refs)) => refs,
                    _ => main.insert(txn, FIELD_REFS, MapPrelim::<Any>::new()),
                };
                refs.insert(txn, id.as_str(), true);
            }
        });
        self.shared.deliver(Some(&id));

        tracing::debug!(block_id = %id, main_id, document_id, "Created reference block");
        Ok(id)
    }

    /// Write new content to a block and every block mirroring the same main.
    ///
    /// Byte-equal content is a no-op. Unknown ids are ignored.
    pub fn update_content(&self, block_id: &str, content: &str) -> Result<()> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let contents = room.map(CONTENT_MAP);

        let targets = {
            let txn = room.doc().transact();
            let Some(meta) = read_meta(&blocks, &txn, block_id) else {
                tracing::debug!(block_id, "Ignoring content update for unknown block");
                return Ok(());
            };
            if read_content(&contents, &txn, block_id).as_deref() == Some(content) {
                return Ok(());
            }
            propagation_targets(&blocks, &txn, &meta)
        };

        let now = self.shared.tick();
        room.transact_local(|txn| {
            for target in &targets {
                if let Some(Value::YMap(entry)) = blocks.get(&*txn, target) {
                    entry.insert(txn, FIELD_UPDATED_AT, Any::BigInt(now));
                    contents.insert(txn, target.as_str(), content);
                }
            }
        });

        tracing::debug!(block_id, fanout = targets.len().saturating_sub(1), "Propagated block content");
        self.shared.deliver(Some(block_id));
        Ok(())
    }

    /// Delete a block. Deleting a main deletes its references; deleting a
    /// reference only detaches it from its main. Unknown ids are ignored.
    pub fn delete_block(&self, block_id: &str) -> Result<()> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let contents = room.map(CONTENT_MAP);

        let (meta, doomed) = {
            let txn = room.doc().transact();
            let Some(meta) = read_meta(&blocks, &txn, block_id) else {
                tracing::debug!(block_id, "Ignoring delete of unknown block");
                return Ok(());
            };
            let mut doomed: BTreeSet<String> = BTreeSet::new();
            if meta.is_main() {
                doomed.extend(meta.refs.iter().cloned());
                // References created concurrently may not be in `refs` yet
                doomed.extend(
                    all_metas(&blocks, &txn)
                        .into_iter()
                        .filter(|m| m.main_id.as_deref() == Some(block_id))
                        .map(|m| m.id),
                );
            }
            (meta, doomed)
        };

        room.transact_local(|txn| {
            for reference in &doomed {
                blocks.remove(txn, reference);
                contents.remove(txn, reference);
            }
            if let Some(main_id) = meta.main_id.as_deref().filter(|_| !meta.is_main()) {
                if let Some(Value::YMap(main)) = blocks.get(&*txn, main_id) {
                    if let Some(Value::YMap(refs)) = main.get(&*txn, FIELD_REFS) {
                        refs.remove(txn, block_id);
                    }
                }
            }
            blocks.remove(txn, block_id);
            contents.remove(txn, block_id);
        });

        tracing::debug!(block_id, cascaded = doomed.len(), "Deleted block");
        self.shared.deliver(Some(block_id));
        Ok(())
    }

    pub fn get_info(&self, block_id: &str) -> Result<Option<BlockMeta>> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let txn = room.doc().transact();
        Ok(read_meta(&blocks, &txn, block_id))
    }

    /// Current content of a block; empty for unknown ids
    pub fn get_content(&self, block_id: &str) -> Result<String> {
        let room = self.shared.room()?;
        let contents = room.map(CONTENT_MAP);
        let txn = room.doc().transact();
        Ok(read_content(&contents, &txn, block_id).unwrap_or_default())
    }

    /// Id of the main a block mirrors (itself for a main)
    pub fn main_of(&self, block_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_info(block_id)?
            .and_then(|meta| meta.main_id().map(str::to_string)))
    }

    /// All main blocks, most recently updated first
    pub fn list_mains(&self) -> Result<Vec<BlockMeta>> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let txn = room.doc().transact();
        let mut mains: Vec<BlockMeta> = all_metas(&blocks, &txn).into_iter().filter(BlockMeta::is_main).collect();
        mains.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(mains)
    }

    /// References mirroring `main_id`, oldest first
    pub fn list_references(&self, main_id: &str) -> Result<Vec<BlockMeta>> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let txn = room.doc().transact();
        let mut refs: Vec<BlockMeta> = all_metas(&blocks, &txn)
            .into_iter()
            .filter(|meta| !meta.is_main() && meta.main_id.as_deref() == Some(main_id))
            .collect();
        refs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(refs)
    }

    /// Delete references whose main is gone and drop dangling `refs`
    /// entries. Returns how many entries were removed.
    pub fn prune_orphans(&self) -> Result<usize> {
        let room = self.shared.room()?;
        let blocks = room.map(BLOCKS_MAP);
        let contents = room.map(CONTENT_MAP);

        let (orphans, dangling) = {
            let txn = room.doc().transact();
            let metas: HashMap<String, BlockMeta> = all_metas(&blocks, &txn)
                .into_iter()
                .map(|meta| (meta.id.clone(), meta))
                .collect();

            let orphans: Vec<String> = metas
                .values()
                .filter(|meta| !meta.is_main())
                .filter(|meta| {
                    !meta
                        .main_id
                        .as_ref()
                        .and_then(|main_id| metas.get(main_id))
                        .is_some_and(BlockMeta::is_main)
                })
                .map(|meta| meta.id.clone())
                .collect();

            let dangling: Vec<(String, String)> = metas
                .values()
                .filter(|meta| meta.is_main())
                .flat_map(|main| {
                    main.refs
                        .iter()
                        .filter(|reference| {
                            !metas
                                .get(reference.as_str())
                                .is_some_and(|r| r.main_id.as_deref() == Some(main.id.as_str()))
                        })
                        .map(|reference| (main.id.clone(), reference.clone()))
                        .collect::<Vec<_>>()
                })
                .collect();

            (orphans, dangling)
        };

        let removed = orphans.len() + dangling.len();
        if removed == 0 {
            return Ok(0);
        }

        room.transact_local(|txn| {
            for orphan in &orphans {
                blocks.remove(txn, orphan);
                contents.remove(txn, orphan);
            }
            for (main_id, reference) in &dangling {
                if let Some(Value::YMap(main)) = blocks.get(&*txn, main_id) {
                    if let Some(Value::YMap(refs)) = main.get(&*txn, FIELD_REFS) {
                        refs.remove(txn, reference);
                    }
                }
            }
        });

        tracing::warn!(orphans = orphans.len(), dangling = dangling.len(), "Pruned orphaned block entries");
        self.shared.deliver(None);
        Ok(removed)
    }

    /// Register a callback fired when the content of `block_id` changes
    pub fn subscribe(&self, block_id: &str, callback: BlockCallback) -> Result<BlockSubscription> {
        let current = self.get_content(block_id)?;
        self.shared
            .seen
            .lock()
            .entry(block_id.to_string())
            .or_insert(current);

        let mut subscribers = self.shared.subscribers.lock();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers
            .by_block
            .entry(block_id.to_string())
            .or_default()
            .push((id, callback));

        Ok(BlockSubscription {
            id,
            block_id: block_id.to_string(),
            shared: Arc::downgrade(&self.shared),
        })
    }

    pub fn subscriber_count(&self, block_id: &str) -> usize {
        self.shared
            .subscribers
            .lock()
            .by_block
            .get(block_id)
            .map_or(0, Vec::len)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registered callback; unsubscribes when dropped
pub struct BlockSubscription {
    id: u64,
    block_id: String,
    shared: Weak<Shared>,
}

impl BlockSubscription {
    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Whether the registry still holds this callback (it is dropped on
    /// shutdown)
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.subscribers.lock().contains(&self.block_id, self.id))
    }

    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut subscribers = shared.subscribers.lock();
            subscribers.remove(&self.block_id, self.id);
            if !subscribers.by_block.contains_key(&self.block_id) {
                shared.seen.lock().remove(&self.block_id);
            }
        }
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn new_block_id(role: BlockRole) -> String {
    format!("{}-{}", role.id_prefix(), Uuid::new_v4())
}

/// Blocks that must receive a write made to the block described by `meta`,
/// the block itself first
fn propagation_targets<T: ReadTxn>(blocks: &MapRef, txn: &T, meta: &BlockMeta) -> Vec<String> {
    let mut targets = vec![meta.id.clone()];
    match meta.role {
        BlockRole::Main => targets.extend(meta.refs.iter().cloned()),
        BlockRole::Reference => {
            let main = meta
                .main_id
                .as_deref()
                .and_then(|main_id| read_meta(blocks, txn, main_id))
                .filter(BlockMeta::is_main);
            match main {
                Some(main) => {
                    targets.push(main.id.clone());
                    targets.extend(main.refs.into_iter().filter(|r| *r != meta.id));
                }
                None => {
                    tracing::warn!(block_id = %meta.id, "Reference has no main; writing it alone");
                }
            }
        }
    }
    targets
}

fn read_content<T: ReadTxn>(contents: &MapRef, txn: &T, block_id: &str) -> Option<String> {
    match contents.get(txn, block_id) {
        Some(Value::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

fn read_str<T: ReadTxn>(entry: &MapRef, txn: &T, field: &str) -> Option<String> {
    match entry.get(txn, field) {
        Some(Value::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

fn read_time<T: ReadTxn>(entry: &MapRef, txn: &T, field: &str) -> DateTime<Utc> {
    let millis = match entry.get(txn, field) {
        Some(Value::Any(Any::BigInt(n))) => n,
        Some(Value::Any(Any::Number(n))) => n as i64,
        _ => 0,
    };
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn read_meta<T: ReadTxn>(blocks: &MapRef, txn: &T, block_id: &str) -> Option<BlockMeta> {
    let Some(Value::YMap(entry)) = blocks.get(txn, block_id) else {
        return None;
    };
    meta_from_entry(block_id, &entry, txn)
}

fn meta_from_entry<T: ReadTxn>(block_id: &str, entry: &MapRef, txn: &T) -> Option<BlockMeta> {
    let role: BlockRole = read_str(entry, txn, FIELD_ROLE)?.parse().ok()?;
    let refs = match entry.get(txn, FIELD_REFS) {
        Some(Value::YMap(refs)) => refs.keys(txn).map(str::to_string).collect(),
        _ => BTreeSet::new(),
    };

    Some(BlockMeta {
        id: block_id.to_string(),
        role,
        main_id: match role {
            BlockRole::Main => None,
            BlockRole::Reference => read_str(entry, txn, FIELD_MAIN_ID),
        },
        refs: match role {
            BlockRole::Main => refs,
            BlockRole::Reference => BTreeSet::new(),
        },
        document_id: read_str(entry, txn, FIELD_DOCUMENT_ID).unwrap_or_default(),
        created_at: read_time(entry, txn, FIELD_CREATED_AT),
        updated_at: read_time(entry, txn, FIELD_UPDATED_AT),
    })
}

fn all_metas<T: ReadTxn>(blocks: &MapRef, txn: &T) -> Vec<BlockMeta> {
    blocks
        .iter(txn)
        .filter_map(|(id, value)| match value {
            Value::YMap(entry) => meta_from_entry(id, &entry, txn),
            _ => None,
        })
        .collect()
}
