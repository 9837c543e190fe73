//! Mirrordoc - replicated state layer for a collaborative document editor
//!
//! Synchronized blocks mirror one canonical content unit across documents,
//! comment threads ride on each document's room, and a relay server fans
//! updates out between replicas and stores saved snapshots.

pub mod api;
pub mod blocks;
pub mod comments;
pub mod config;
pub mod error;
pub mod models;
pub mod saver;
pub mod session;
pub mod store;
pub mod substrate;
pub mod sync;
pub mod websocket;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::{CollabError, Result};

/// Application state shared across handlers
pub struct AppState {
    pub hub: Arc<substrate::Hub>,
    pub store: store::DocumentStore,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::new(substrate::Hub::new()),
            store: store::DocumentStore::new(pool),
        })
    }
}

/// Routes of the relay server
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/documents", get(api::list_documents))
        .route(
            "/documents/:id",
            get(api::get_document).put(api::put_document),
        )
        .route("/ws/:room_id", get(websocket::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
