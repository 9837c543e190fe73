//! Comment threads anchored to text selections

pub mod store;

pub use store::{CommentThreadStore, Decoration};
