//! Persistence collaborator for document snapshots

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{CollabError, Result};
use crate::models::{Document, SaveDocumentRequest, SaveOutcome};

/// Something that stores serialized documents.
///
/// Failures are reported in the outcome, never retried here.
#[async_trait]
pub trait DocumentSaver: Send + Sync {
    async fn save_document(&self, document_id: &str, content: &str, title: &str) -> SaveOutcome;
}

/// Saves documents through the relay server's HTTP API
pub struct HttpDocumentSaver {
    client: Client,
    base_url: String,
}

impl HttpDocumentSaver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn document_url(&self, document_id: &str) -> String {
        format!("{}/documents/{}", self.base_url, document_id)
    }

    /// Fetch the last saved snapshot of a document
    pub async fn load_document(&self, document_id: &str) -> Result<Document> {
        let response = self.client.get(self.document_url(document_id)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CollabError::NotFound(format!("Document {} not found", document_id)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CollabError::Transport(format!(
                "Failed to load document: {} - {}",
                status, text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl DocumentSaver for HttpDocumentSaver {
    async fn save_document(&self, document_id: &str, content: &str, title: &str) -> SaveOutcome {
        let request = SaveDocumentRequest {
            title: title.to_string(),
            content: content.to_string(),
        };

        let response = match self
            .client
            .put(self.document_url(document_id))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(document_id, "Save request failed: {}", e);
                return SaveOutcome::failed(e.to_string());
            }
        };

        if response.status().is_success() {
            SaveOutcome::ok()
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(document_id, %status, "Save rejected");
            SaveOutcome::failed(format!("{} - {}", status, text))
        }
    }
}
