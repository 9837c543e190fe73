//! Comment threads anchored to text ranges
//!
//! Threads live in the `threads` map of the document's body room. Each
//! entry is a nested map holding the range (JSON), the creation time and a
//! nested `comments` map from comment id to the comment as JSON.
//!
//! Anchors are frozen at creation. They are not moved when text is edited
//! before them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::{Any, Map, MapPrelim, MapRef, ReadTxn, Transact, Value};

use crate::error::{CollabError, Result};
use crate::models::{Comment, CommentThread, TextPoint, TextRange};
use crate::substrate::SharedRoom;

const THREADS_MAP: &str = "threads";
const FIELD_RANGE: &str = "range";
const FIELD_CREATED_AT: &str = "createdAt";
const FIELD_COMMENTS: &str = "comments";

/// Highlight of a commented span inside one text leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    /// The part of the thread's range that falls inside the leaf
    pub range: TextRange,
    pub thread_id: String,
}

pub struct CommentThreadStore {
    room: Arc<SharedRoom>,
    clock: Mutex<i64>,
}

impl CommentThreadStore {
    pub fn new(room: Arc<SharedRoom>) -> Self {
        Self {
            room,
            clock: Mutex::new(0),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock();
        let now = Utc::now().timestamp_millis();
        *last = if now > *last { now } else { *last + 1 };
        DateTime::from_timestamp_millis(*last).unwrap_or_default()
    }

    /// Start a thread on a non-empty selection.
    ///
    /// Returns `None` for an empty selection. A selection identical to an
    /// existing thread's range adds the comment to that thread instead.
    pub fn add_thread(&self, range: &TextRange, content: &str, author: &str) -> Result<Option<String>> {
        if range.is_collapsed() {
            tracing::debug!("Ignoring comment on an empty selection");
            return Ok(None);
        }

        if let Some(existing) = self.find_by_range(range) {
            self.try_reply(&existing.id, content, author)?;
            return Ok(Some(existing.id));
        }

        let threads = self.room.map(THREADS_MAP);
        let thread_id = format!("thread-{}", Uuid::new_v4());
        let comment = self.new_comment(content, author);
        let range_json = serde_json::to_string(range).map_err(|e| CollabError::Internal(e.to_string()))?;
        let comment_json = serde_json::to_string(&comment).map_err(|e| CollabError::Internal(e.to_string()))?;

        self.room.transact_local(|txn| {
            let entry = threads.insert(txn, thread_id.as_str(), MapPrelim::<Any>::new());
            entry.insert(txn, FIELD_RANGE, range_json.as_str());
            entry.insert(txn, FIELD_CREATED_AT, Any::BigInt(comment.created_at.timestamp_millis()));
            let comments = entry.insert(txn, FIELD_COMMENTS, MapPrelim::<Any>::new());
            comments.insert(txn, comment.id.as_str(), comment_json.as_str());
        });

        tracing::debug!(thread_id = %thread_id, author, "Created comment thread");
        Ok(Some(thread_id))
    }

    /// Append a comment to a thread. Unknown threads are logged and ignored.
    pub fn reply(&self, thread_id: &str, content: &str, author: &str) -> Option<String> {
        match self.try_reply(thread_id, content, author) {
            Ok(comment_id) => Some(comment_id),
            Err(e) => {
                tracing::warn!(thread_id, "Reply dropped: {}", e);
                None
            }
        }
    }

    fn try_reply(&self, thread_id: &str, content: &str, author: &str) -> Result<String> {
        let latest = self
            .thread(thread_id)
            .ok_or_else(|| CollabError::UnknownThread(thread_id.to_string()))?
            .comments
            .last()
            .map(|c| c.created_at);
        if let Some(latest) = latest {
            // Replies sort after everything already in the thread
            let mut clock = self.clock.lock();
            *clock = (*clock).max(latest.timestamp_millis());
        }

        let threads = self.room.map(THREADS_MAP);
        let comment = self.new_comment(content, author);
        let comment_json = serde_json::to_string(&comment).map_err(|e| CollabError::Internal(e.to_string()))?;

        let appended = self.room.transact_local(|txn| {
            let Some(comments) = comments_map(&threads, &*txn, thread_id) else {
                return false;
            };
            comments.insert(txn, comment.id.as_str(), comment_json.as_str());
            true
        });

        if appended {
            Ok(comment.id)
        } else {
            Err(CollabError::UnknownThread(thread_id.to_string()))
        }
    }

    /// Replace the content of one comment, leaving the others untouched
    pub fn edit_comment(&self, thread_id: &str, comment_id: &str, new_content: &str) -> bool {
        let Some(thread) = self.thread(thread_id) else {
            tracing::warn!(thread_id, "Edit dropped: {}", CollabError::UnknownThread(thread_id.to_string()));
            return false;
        };
        let Some(mut comment) = thread.comments.into_iter().find(|c| c.id == comment_id) else {
            tracing::warn!(thread_id, comment_id, "Edit dropped: unknown comment");
            return false;
        };
        if comment.content == new_content {
            return true;
        }
        comment.content = new_content.to_string();
        let Ok(comment_json) = serde_json::to_string(&comment) else {
            return false;
        };

        let threads = self.room.map(THREADS_MAP);
        self.room.transact_local(|txn| match comments_map(&threads, &*txn, thread_id) {
            Some(comments) => {
                comments.insert(txn, comment_id, comment_json.as_str());
                true
            }
            None => false,
        })
    }

    /// Remove a whole thread
    pub fn delete_thread(&self, thread_id: &str) -> bool {
        let threads = self.room.map(THREADS_MAP);
        let exists = {
            let txn = self.room.doc().transact();
            threads.get(&txn, thread_id).is_some()
        };
        if !exists {
            tracing::debug!(thread_id, "Ignoring delete of unknown thread");
            return false;
        }

        self.room.transact_local(|txn| {
            threads.remove(txn, thread_id);
        });
        tracing::debug!(thread_id, "Deleted comment thread");
        true
    }

    /// Remove one comment; removing the root comment removes the thread
    pub fn delete_comment(&self, thread_id: &str, comment_id: &str) -> bool {
        let Some(thread) = self.thread(thread_id) else {
            tracing::debug!(thread_id, "Ignoring delete in unknown thread");
            return false;
        };
        if thread.root().is_some_and(|root| root.id == comment_id) {
            return self.delete_thread(thread_id);
        }
        if !thread.comments.iter().any(|c| c.id == comment_id) {
            return false;
        }

        let threads = self.room.map(THREADS_MAP);
        self.room.transact_local(|txn| match comments_map(&threads, &*txn, thread_id) {
            Some(comments) => comments.remove(txn, comment_id).is_some(),
            None => false,
        })
    }

    pub fn thread(&self, thread_id: &str) -> Option<CommentThread> {
        let threads = self.room.map(THREADS_MAP);
        let txn = self.room.doc().transact();
        match threads.get(&txn, thread_id) {
            Some(Value::YMap(entry)) => read_thread(thread_id, &entry, &txn),
            _ => None,
        }
    }

    /// Every thread, oldest first
    pub fn threads(&self) -> Vec<CommentThread> {
        let threads = self.room.map(THREADS_MAP);
        let txn = self.room.doc().transact();
        let mut all: Vec<CommentThread> = threads
            .iter(&txn)
            .filter_map(|(id, value)| match value {
                Value::YMap(entry) => read_thread(id, &entry, &txn),
                _ => None,
            })
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Thread whose anchor and focus both equal the given range's
    pub fn find_by_range(&self, range: &TextRange) -> Option<CommentThread> {
        self.threads().into_iter().find(|thread| &thread.range == range)
    }

    /// Commented spans inside the text leaf at `path` holding `len` chars
    pub fn decorations_for(&self, path: &[usize], len: usize) -> Vec<Decoration> {
        let leaf_start = TextPoint::new(path, 0);
        let leaf_end = TextPoint::new(path, len);

        self.threads()
            .into_iter()
            .filter_map(|thread| {
                let (start, end) = thread.range.ordered();
                if *start > leaf_end || *end < leaf_start {
                    return None;
                }
                let from = if start.path.as_slice() == path { start.offset.min(len) } else { 0 };
                let to = if end.path.as_slice() == path { end.offset.min(len) } else { len };
                (from < to).then(|| Decoration {
                    range: TextRange::new(TextPoint::new(path, from), TextPoint::new(path, to)),
                    thread_id: thread.id.clone(),
                })
            })
            .collect()
    }

    fn new_comment(&self, content: &str, author: &str) -> Comment {
        Comment {
            id: format!("comment-{}", Uuid::new_v4()),
            author: author.to_string(),
            content: content.to_string(),
            created_at: self.tick(),
        }
    }
}

fn comments_map<T: ReadTxn>(threads: &MapRef, txn: &T, thread_id: &str) -> Option<MapRef> {
    let Some(Value::YMap(entry)) = threads.get(txn, thread_id) else {
        return None;
    };
    match entry.get(txn, FIELD_COMMENTS) {
        Some(Value::YMap(comments)) => Some(comments),
        _ => None,
    }
}

fn read_thread<T: ReadTxn>(thread_id: &str, entry: &MapRef, txn: &T) -> Option<CommentThread> {
    let range = match entry.get(txn, FIELD_RANGE) {
        Some(Value::Any(Any::String(json))) => match serde_json::from_str::<TextRange>(&json) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(thread_id, "Skipping thread with unreadable range: {}", e);
                return None;
            }
        },
        _ => return None,
    };
    let created_millis = match entry.get(txn, FIELD_CREATED_AT) {
        Some(Value::Any(Any::BigInt(n))) => n,
        Some(Value::Any(Any::Number(n))) => n as i64,
        _ => 0,
    };

    let mut comments: Vec<Comment> = match entry.get(txn, FIELD_COMMENTS) {
        Some(Value::YMap(comments)) => comments
            .iter(txn)
            .filter_map(|(_, value)| match value {
                Value::Any(Any::String(json)) => serde_json::from_str(&json).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    Some(CommentThread {
        id: thread_id.to_string(),
        range,
        comments,
        created_at: DateTime::from_timestamp_millis(created_millis).unwrap_or_default(),
    })
}
