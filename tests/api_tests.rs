//! API integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mirrordoc::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

async fn setup_app() -> Router {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool);
    state.store.migrate().await.expect("Failed to run migrations");

    mirrordoc::router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_put_then_get_document() {
    let app = setup_app().await;

    let response = app
        .clone()
        .oneshot(put(
            "/documents/doc-1",
            serde_json::json!({"title": "Notes", "content": "[]"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/documents/doc-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc = body_json(response).await;
    assert_eq!(doc["id"], "doc-1");
    assert_eq!(doc["title"], "Notes");
    assert_eq!(doc["content"], "[]");
}

#[tokio::test]
async fn test_get_missing_document() {
    let app = setup_app().await;

    let response = app.oneshot(get("/documents/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_rejects_malformed_body() {
    let app = setup_app().await;

    let response = app
        .oneshot(put("/documents/doc-1", serde_json::json!({"title": "No content"})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_list_documents() {
    let app = setup_app().await;

    for id in ["a", "b"] {
        let response = app
            .clone()
            .oneshot(put(
                &format!("/documents/{}", id),
                serde_json::json!({"title": id, "content": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get("/documents")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let docs = body_json(response).await;
    assert_eq!(docs.as_array().unwrap().len(), 2);
}
