//! Synchronized blocks shared across documents

pub mod registry;

pub use registry::{BlockCallback, BlockRegistry, BlockSubscription};
