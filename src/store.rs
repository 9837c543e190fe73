//! Database store for saved documents

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{CollabError, Result};
use crate::models::{Document, SaveOutcome};
use crate::saver::DocumentSaver;

/// Database store
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if needed
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CollabError::Internal(format!("Migration failed: {}", e)))
    }

    /// Insert or replace a document snapshot
    pub async fn put_document(&self, id: &str, title: &str, content: &str) -> Result<Document> {
        if id.trim().is_empty() {
            return Err(CollabError::BadRequest("Document id must not be empty".to_string()));
        }
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(document_id = id, bytes = content.len(), "Saved document");

        Ok(Document {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            updated_at: now,
        })
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, title, content, updated_at
            FROM documents
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CollabError::NotFound(format!("Document {} not found", id)))?;

        Ok(row.into())
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, title, content, updated_at
            FROM documents
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Document::from).collect())
    }
}

#[async_trait]
impl DocumentSaver for DocumentStore {
    async fn save_document(&self, document_id: &str, content: &str, title: &str) -> SaveOutcome {
        match self.put_document(document_id, title, content).await {
            Ok(_) => SaveOutcome::ok(),
            Err(e) => {
                tracing::warn!(document_id, "Failed to save document: {}", e);
                SaveOutcome::failed(e.to_string())
            }
        }
    }
}

// Internal row type for sqlx

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    content: String,
    updated_at: chrono::DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            title: row.title,
            content: row.content,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> DocumentStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        let store = DocumentStore::new(pool);
        store.migrate().await.expect("Failed to run migrations");
        store
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = store().await;
        store.put_document("doc-1", "Notes", "[]").await.unwrap();

        let doc = store.get_document("doc-1").await.unwrap();
        assert_eq!(doc.title, "Notes");
        assert_eq!(doc.content, "[]");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = store().await;
        store.put_document("doc-1", "Draft", "a").await.unwrap();
        store.put_document("doc-1", "Final", "b").await.unwrap();

        let doc = store.get_document("doc-1").await.unwrap();
        assert_eq!(doc.title, "Final");
        assert_eq!(doc.content, "b");
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = store().await;
        let err = store.get_document("nope").await.unwrap_err();
        assert!(matches!(err, CollabError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let store = store().await;
        store.put_document("older", "A", "").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.put_document("newer", "B", "").await.unwrap();

        let ids: Vec<String> = store
            .list_documents()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["newer".to_string(), "older".to_string()]);
    }

    #[tokio::test]
    async fn test_saver_reports_failure() {
        let store = store().await;
        let outcome = store.save_document("", "[]", "Empty id").await;
        assert!(!outcome.success);

        let outcome = store.save_document("doc-2", "[]", "Fine").await;
        assert_eq!(outcome, SaveOutcome::ok());
    }
}
