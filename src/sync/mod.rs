//! Moving block content between an editing surface and the registry

pub mod diff;
pub mod editor;
pub mod orchestrator;

pub use diff::{minimal_edit, TextEdit};
pub use editor::{EditorDocument, EditorSurface, Element, ElementKind, InsertionPoint, Node};
pub use orchestrator::{SweepReport, SyncOrchestrator};
