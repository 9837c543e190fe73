//! Data models for synchronized blocks, comment threads and saved documents

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a synchronized block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRole {
    /// Canonical instance of a synchronized content unit
    Main,
    /// Mirror of a main block's content
    Reference,
}

impl BlockRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockRole::Main => "main",
            BlockRole::Reference => "reference",
        }
    }

    /// Prefix used when allocating block ids of this role
    pub fn id_prefix(&self) -> &'static str {
        match self {
            BlockRole::Main => "main",
            BlockRole::Reference => "ref",
        }
    }
}

impl std::str::FromStr for BlockRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(BlockRole::Main),
            "reference" => Ok(BlockRole::Reference),
            _ => Err(format!("Invalid block role: {}", s)),
        }
    }
}

/// Metadata of a synchronized block as stored in the global room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub id: String,
    pub role: BlockRole,
    /// Set only on references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_id: Option<String>,
    /// Set only on mains: ids of the references mirroring this block
    pub refs: BTreeSet<String>,
    /// Originating document (informational)
    pub document_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockMeta {
    pub fn is_main(&self) -> bool {
        self.role == BlockRole::Main
    }

    /// Id of the main block this block mirrors (itself for a main)
    pub fn main_id(&self) -> Option<&str> {
        match self.role {
            BlockRole::Main => Some(self.id.as_str()),
            BlockRole::Reference => self.main_id.as_deref(),
        }
    }
}

/// A position in the structured text tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextPoint {
    /// Child indices from the root down to a text leaf
    pub path: Vec<usize>,
    /// Character offset inside the leaf
    pub offset: usize,
}

impl TextPoint {
    pub fn new(path: impl Into<Vec<usize>>, offset: usize) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }
}

/// A text selection, possibly backwards (focus before anchor)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub anchor: TextPoint,
    pub focus: TextPoint,
}

impl TextRange {
    pub fn new(anchor: TextPoint, focus: TextPoint) -> Self {
        Self { anchor, focus }
    }

    /// A caret inside a single leaf
    pub fn collapsed(point: TextPoint) -> Self {
        Self {
            anchor: point.clone(),
            focus: point,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    /// Start and end in document order
    pub fn ordered(&self) -> (&TextPoint, &TextPoint) {
        if self.anchor <= self.focus {
            (&self.anchor, &self.focus)
        } else {
            (&self.focus, &self.anchor)
        }
    }
}

/// A single comment inside a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A discussion anchored to a frozen text range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentThread {
    pub id: String,
    pub range: TextRange,
    /// Ordered by creation, root comment first
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

impl CommentThread {
    pub fn root(&self) -> Option<&Comment> {
        self.comments.first()
    }
}

/// A document snapshot handed to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Request body for saving a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveDocumentRequest {
    pub title: String,
    pub content: String,
}

/// Result reported by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
