//! Document sessions against a running relay server

use mirrordoc::config::SessionConfig;
use mirrordoc::models::{TextPoint, TextRange};
use mirrordoc::saver::HttpDocumentSaver;
use mirrordoc::session::{DocumentSession, SessionEvent};
use mirrordoc::substrate::{Connector, WsConnector};
use mirrordoc::sync::{EditorDocument, EditorSurface, Node};
use mirrordoc::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool);
    state.store.migrate().await.expect("Failed to run migrations");
    let app = mirrordoc::router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

async fn open(addr: SocketAddr, document_id: &str, user: &str, nodes: Vec<Node>) -> DocumentSession<EditorDocument> {
    let mut config = SessionConfig::new(document_id, user).with_title("Shared notes");
    config.autosave_debounce = Duration::from_millis(100);
    config.sync.push_debounce = Duration::from_millis(50);
    config.sync.sweep_interval = Duration::from_millis(50);

    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(format!("ws://{}", addr)));
    let saver = Arc::new(HttpDocumentSaver::new(format!("http://{}", addr)));

    DocumentSession::open(config, connector, EditorDocument::from_nodes(nodes), saver)
        .await
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_block_edits_mirror_across_documents() {
    let (addr, _state) = setup_server().await;

    let alice = open(addr, "doc-a", "Alice", vec![Node::paragraph("intro")]).await;
    alice.select(|doc| doc.set_selection(Some(TextRange::collapsed(TextPoint::new(vec![0, 0], 5)))));
    let main = alice.orchestrator().insert_new_block().unwrap();

    let bob = open(addr, "doc-b", "Bob", vec![Node::paragraph("")]).await;
    assert!(eventually(|| bob.registry().get_info(&main).ok().flatten().is_some()).await);
    let reference = bob.orchestrator().insert_reference(&main).unwrap();

    // Typing in the main reaches the reference after the push debounce
    alice.edit(|doc| {
        let point = TextPoint::new(vec![1, 0], 0);
        doc.set_selection(Some(TextRange::collapsed(point.clone())));
        doc.insert_text(&point, "The quick fox");
    });
    assert!(
        eventually(|| bob.editor().lock().block_text(&reference).as_deref() == Some("The quick fox")).await
    );

    // And typing in the reference comes back
    bob.edit(|doc| {
        let point = TextPoint::new(vec![1, 0], 9);
        doc.set_selection(Some(TextRange::collapsed(point.clone())));
        doc.insert_text(&point, " brown");
    });
    assert!(
        eventually(|| alice.editor().lock().block_text(&main).as_deref() == Some("The quick brown fox")).await
    );

    let refs = alice.registry().list_references(&main).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].id, reference);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn test_comments_and_presence_shared_within_document() {
    let (addr, _state) = setup_server().await;

    let alice = open(addr, "doc-1", "Alice", vec![Node::paragraph("hello world")]).await;
    let bob = open(addr, "doc-1", "Bob", vec![Node::paragraph("hello world")]).await;

    let range = TextRange::new(TextPoint::new(vec![0, 0], 0), TextPoint::new(vec![0, 0], 5));
    let thread_id = alice
        .comments()
        .add_thread(&range, "Greeting?", "Alice")
        .unwrap()
        .unwrap();

    assert!(eventually(|| bob.comments().thread(&thread_id).is_some()).await);
    bob.comments().reply(&thread_id, "Yes", "Bob").unwrap();

    assert!(eventually(|| alice.comments().thread(&thread_id).map(|t| t.comments.len()) == Some(2)).await);
    let decorations = alice.comments().decorations_for(&[0, 0], 11);
    assert_eq!(decorations.len(), 1);
    assert_eq!(decorations[0].thread_id, thread_id);

    assert!(eventually(|| bob.presence_states().contains_key(&alice.client_id())).await);
    let alice_state = bob.presence_states()[&alice.client_id()].clone();
    assert_eq!(alice_state.name, "Alice");

    alice.close().await;
    assert!(eventually(|| !bob.presence_states().contains_key(&alice.client_id())).await);
    bob.close().await;
}

#[tokio::test]
async fn test_autosave_persists_snapshot() {
    let (addr, state) = setup_server().await;

    let session = open(addr, "doc-saved", "Alice", vec![Node::paragraph("")]).await;
    let mut events = session.events();

    session.edit(|doc| doc.insert_text(&TextPoint::new(vec![0, 0], 0), "draft"));
    session.set_title("Renamed");

    let saved = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Saved) => break,
                Ok(SessionEvent::SaveFailed { error }) => panic!("Save failed: {}", error),
                Ok(_) => continue,
                Err(e) => panic!("Event stream ended: {:?}", e),
            }
        }
    })
    .await;
    assert!(saved.is_ok());

    let doc = state.store.get_document("doc-saved").await.unwrap();
    assert_eq!(doc.title, "Renamed");
    let restored = EditorDocument::from_json(&doc.content).unwrap();
    assert_eq!(restored.plain_text(), "draft");

    session.close().await;
}
