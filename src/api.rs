//! HTTP handlers for saved documents

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Document, SaveDocumentRequest};
use crate::AppState;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Document>>> {
    Ok(Json(state.store.list_documents().await?))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>> {
    Ok(Json(state.store.get_document(&id).await?))
}

/// Store the latest snapshot of a document
pub async fn put_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SaveDocumentRequest>,
) -> Result<Json<Document>> {
    let document = state
        .store
        .put_document(&id, &request.title, &request.content)
        .await?;
    Ok(Json(document))
}
