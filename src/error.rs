//! Error types for the replicated state layer and the relay server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollabError {
    #[error("Shared substrate not initialized")]
    NotInitialized,

    #[error("Main block not found: {0}")]
    MainNotFound(String),

    #[error("Unknown comment thread: {0}")]
    UnknownThread(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Update decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for CollabError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CollabError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            CollabError::Http(e) => {
                tracing::error!("HTTP error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("HTTP error: {}", e))
            }
            CollabError::Transport(e) => {
                tracing::error!("Transport error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Transport error: {}", e))
            }
            CollabError::NotInitialized => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            CollabError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            CollabError::MainNotFound(_) | CollabError::UnknownThread(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            CollabError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            CollabError::Decode(e) => (StatusCode::BAD_REQUEST, format!("Invalid update: {}", e)),
            CollabError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CollabError>;
