//! Structured-text editing surface
//!
//! [`EditorSurface`] is what the orchestrator needs from an editor.
//! [`EditorDocument`] is an in-memory tree implementing it: elements
//! (paragraphs, headings, synchronized blocks) holding text leaves.

use serde::{Deserialize, Serialize};

use super::diff::TextEdit;
use crate::error::{CollabError, Result};
use crate::models::{TextPoint, TextRange};

/// Kind of an element node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Paragraph,
    Heading { level: u8 },
    /// A synchronized block; its text mirrors the registry entry `block_id`
    SyncBlock { block_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(flatten)]
    pub kind: ElementKind,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Element(Element),
    Text { text: String },
}

impl Node {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::element(ElementKind::Paragraph, text)
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::element(ElementKind::Heading { level }, text)
    }

    pub fn sync_block(block_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::element(
            ElementKind::SyncBlock {
                block_id: block_id.into(),
            },
            text,
        )
    }

    fn element(kind: ElementKind, text: impl Into<String>) -> Self {
        Node::Element(Element {
            kind,
            children: vec![Node::Text { text: text.into() }],
        })
    }

    /// Concatenated text of every leaf below this node
    pub fn text(&self) -> String {
        match self {
            Node::Text { text } => text.clone(),
            Node::Element(element) => element.children.iter().map(Node::text).collect(),
        }
    }

    fn block_id(&self) -> Option<&str> {
        match self {
            Node::Element(Element {
                kind: ElementKind::SyncBlock { block_id },
                ..
            }) => Some(block_id),
            _ => None,
        }
    }

    fn children(&self) -> &[Node] {
        match self {
            Node::Element(element) => &element.children,
            Node::Text { .. } => &[],
        }
    }
}

/// Where a new block goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertionPoint {
    /// As the next sibling of the node at this path
    After(Vec<usize>),
    /// Split the text at this point and insert between the halves
    Split(TextPoint),
    /// At the end of the document
    End,
}

/// The editing surface the orchestrator drives.
///
/// Quiet edits are applied without an undo-history entry and must not be
/// reported back as local changes.
pub trait EditorSurface: Send + 'static {
    fn selection(&self) -> Option<TextRange>;

    /// Path and block id of the synchronized block enclosing `point`
    fn enclosing_block(&self, point: &TextPoint) -> Option<(Vec<usize>, String)>;

    /// Char length of the text leaf at `point`
    fn leaf_len(&self, point: &TextPoint) -> Option<usize>;

    /// Ids of all synchronized blocks, in document order, without duplicates
    fn block_ids(&self) -> Vec<String>;

    /// Plain text of the first node carrying `block_id`
    fn block_text(&self, block_id: &str) -> Option<String>;

    /// Apply an edit to every node carrying `block_id` without recording it
    fn apply_quiet_edit(&mut self, block_id: &str, edit: &TextEdit) -> bool;

    /// Remove every node carrying `block_id`; returns how many were removed
    fn remove_block(&mut self, block_id: &str) -> usize;

    /// Insert a synchronized block node at `at`
    fn insert_block(&mut self, at: &InsertionPoint, block_id: &str, content: &str);

    /// Full content in the form handed to the persistence collaborator
    fn serialize(&self) -> Result<String>;
}

/// In-memory structured document with a selection and an undo history
#[derive(Debug, Clone, Default)]
pub struct EditorDocument {
    nodes: Vec<Node>,
    selection: Option<TextRange>,
    history: usize,
}

impl EditorDocument {
    pub fn new() -> Self {
        Self::from_nodes(vec![Node::paragraph("")])
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            selection: None,
            history: 0,
        }
    }

    /// Parse a document serialized with [`EditorDocument::to_json`]
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::from_nodes(serde_json::from_str(json)?))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.nodes)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of recorded (undoable) edits
    pub fn history_len(&self) -> usize {
        self.history
    }

    pub fn set_selection(&mut self, selection: Option<TextRange>) {
        self.selection = selection;
    }

    pub fn text_at(&self, point: &TextPoint) -> Option<&str> {
        match self.node(&point.path)? {
            Node::Text { text } => Some(text),
            Node::Element(_) => None,
        }
    }

    /// Insert text at a point as a recorded edit
    pub fn insert_text(&mut self, point: &TextPoint, text: &str) -> bool {
        let Some(Node::Text { text: leaf }) = self.node_mut(&point.path) else {
            return false;
        };
        *leaf = TextEdit {
            offset: point.offset,
            delete: 0,
            insert: text.to_string(),
        }
        .apply(leaf);
        self.history += 1;
        true
    }

    /// Delete `len` chars at a point as a recorded edit
    pub fn delete_text(&mut self, point: &TextPoint, len: usize) -> bool {
        let Some(Node::Text { text: leaf }) = self.node_mut(&point.path) else {
            return false;
        };
        *leaf = TextEdit {
            offset: point.offset,
            delete: len,
            insert: String::new(),
        }
        .apply(leaf);
        self.history += 1;
        true
    }

    /// Whole document as plain text, one line per top-level node
    pub fn plain_text(&self) -> String {
        self.nodes.iter().map(Node::text).collect::<Vec<_>>().join("\n")
    }

    fn node(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get(*first)?;
        for index in rest {
            node = node.children().get(*index)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.nodes.get_mut(*first)?;
        for index in rest {
            node = match node {
                Node::Element(element) => element.children.get_mut(*index)?,
                Node::Text { .. } => return None,
            };
        }
        Some(node)
    }

    /// Sibling list holding the node at `path`
    fn siblings_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Node>> {
        let (_, parent) = path.split_last()?;
        if parent.is_empty() {
            return Some(&mut self.nodes);
        }
        match self.node_mut(parent)? {
            Node::Element(element) => Some(&mut element.children),
            Node::Text { .. } => None,
        }
    }

    /// Map a point inside a block whose leaves were merged onto the merged
    /// leaf, clamped to its length
    fn remap_into_leaf(&self, point: TextPoint, touched: &[(Vec<usize>, Vec<usize>)]) -> TextPoint {
        for (block_path, leaf_lens) in touched {
            let inside = point.path.len() > block_path.len() && point.path.starts_with(block_path);
            if !inside {
                continue;
            }
            let leaf = point.path[block_path.len()];
            let before: usize = leaf_lens.iter().take(leaf).sum();
            let mut path = block_path.clone();
            path.push(0);
            let len = self
                .text_at(&TextPoint::new(path.clone(), 0))
                .map_or(0, |text| text.chars().count());
            return TextPoint::new(path, (before + point.offset).min(len));
        }
        point
    }

    fn split_at(&mut self, point: &TextPoint, block: Node) -> bool {
        // Split the element directly holding the leaf
        let Some((_, element_path)) = point.path.split_last() else {
            return false;
        };
        if element_path.is_empty() {
            return false;
        }
        let element_path = element_path.to_vec();
        let leaf_index = point.path[point.path.len() - 1];

        let Some(Node::Element(element)) = self.node_mut(&element_path) else {
            return false;
        };
        if !matches!(element.children.get(leaf_index), Some(Node::Text { .. })) {
            return false;
        }
        let mut tail_children = element.children.split_off(leaf_index);
        if let Some(Node::Text { text }) = tail_children.first_mut() {
            let chars: Vec<char> = text.chars().collect();
            let offset = point.offset.min(chars.len());
            let head: String = chars[..offset].iter().collect();
            *text = chars[offset..].iter().collect();
            element.children.push(Node::Text { text: head });
        }

        let tail = Node::Element(Element {
            kind: element.kind.clone(),
            children: tail_children,
        });

        let index = element_path[element_path.len() - 1];
        let Some(siblings) = self.siblings_mut(&element_path) else {
            return false;
        };
        siblings.insert(index + 1, block);
        siblings.insert(index + 2, tail);
        true
    }
}

impl EditorSurface for EditorDocument {
    fn selection(&self) -> Option<TextRange> {
        self.selection.clone()
    }

    fn enclosing_block(&self, point: &TextPoint) -> Option<(Vec<usize>, String)> {
        // Nearest ancestor wins
        (1..=point.path.len()).rev().find_map(|depth| {
            let path = &point.path[..depth];
            self.node(path)?
                .block_id()
                .map(|id| (path.to_vec(), id.to_string()))
        })
    }

    fn leaf_len(&self, point: &TextPoint) -> Option<usize> {
        self.text_at(point).map(|text| text.chars().count())
    }

    fn block_ids(&self) -> Vec<String> {
        fn collect(nodes: &[Node], out: &mut Vec<String>) {
            for node in nodes {
                if let Some(id) = node.block_id() {
                    if !out.iter().any(|seen| seen == id) {
                        out.push(id.to_string());
                    }
                }
                collect(node.children(), out);
            }
        }

        let mut ids = Vec::new();
        collect(&self.nodes, &mut ids);
        ids
    }

    fn block_text(&self, block_id: &str) -> Option<String> {
        fn find<'a>(nodes: &'a [Node], block_id: &str) -> Option<&'a Node> {
            nodes.iter().find_map(|node| {
                if node.block_id() == Some(block_id) {
                    Some(node)
                } else {
                    find(node.children(), block_id)
                }
            })
        }

        find(&self.nodes, block_id).map(Node::text)
    }

    fn apply_quiet_edit(&mut self, block_id: &str, edit: &TextEdit) -> bool {
        fn apply(
            nodes: &mut [Node],
            path: &mut Vec<usize>,
            block_id: &str,
            edit: &TextEdit,
            touched: &mut Vec<(Vec<usize>, Vec<usize>)>,
        ) -> bool {
            let mut applied = false;
            for (index, node) in nodes.iter_mut().enumerate() {
                let Node::Element(element) = node else {
                    continue;
                };
                path.push(index);
                if matches!(&element.kind, ElementKind::SyncBlock { block_id: id } if id == block_id) {
                    let leaf_lens = element
                        .children
                        .iter()
                        .map(|child| child.text().chars().count())
                        .collect();
                    match element.children.as_mut_slice() {
                        [Node::Text { text }] => *text = edit.apply(text),
                        children => {
                            let merged: String = children.iter().map(Node::text).collect();
                            element.children = vec![Node::Text {
                                text: edit.apply(&merged),
                            }];
                        }
                    }
                    touched.push((path.clone(), leaf_lens));
                    applied = true;
                } else {
                    applied |= apply(&mut element.children, path, block_id, edit, touched);
                }
                path.pop();
            }
            applied
        }

        let mut touched = Vec::new();
        let applied = apply(&mut self.nodes, &mut Vec::new(), block_id, edit, &mut touched);

        // Edited blocks hold a single leaf now; keep the selection inside it
        if let Some(selection) = self.selection.take() {
            let anchor = self.remap_into_leaf(selection.anchor, &touched);
            let focus = self.remap_into_leaf(selection.focus, &touched);
            self.selection = Some(TextRange::new(anchor, focus));
        }
        applied
    }

    fn remove_block(&mut self, block_id: &str) -> usize {
        fn remove(nodes: &mut Vec<Node>, block_id: &str) -> usize {
            let before = nodes.len();
            nodes.retain(|node| node.block_id() != Some(block_id));
            let mut removed = before - nodes.len();
            for node in nodes.iter_mut() {
                if let Node::Element(element) = node {
                    removed += remove(&mut element.children, block_id);
                }
            }
            removed
        }

        let removed = remove(&mut self.nodes, block_id);
        if removed > 0 && self.nodes.is_empty() {
            self.nodes.push(Node::paragraph(""));
        }
        if removed > 0 {
            // The selection may point into the removed subtree
            self.selection = None;
        }
        removed
    }

    fn insert_block(&mut self, at: &InsertionPoint, block_id: &str, content: &str) {
        let block = Node::sync_block(block_id, content);
        let inserted = match at {
            InsertionPoint::After(path) => match (path.last(), self.siblings_mut(path)) {
                (Some(index), Some(siblings)) => {
                    siblings.insert((index + 1).min(siblings.len()), block.clone());
                    true
                }
                _ => false,
            },
            InsertionPoint::Split(point) => self.split_at(point, block.clone()),
            InsertionPoint::End => false,
        };
        if !inserted {
            self.nodes.push(block);
        }
        self.history += 1;
    }

    fn serialize(&self) -> Result<String> {
        self.to_json()
            .map_err(|e| CollabError::Internal(format!("Failed to serialize document: {}", e)))
    }
}
