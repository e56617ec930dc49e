//! Document store substrate
//!
//! Records are `{hash_id, data}` documents with base64 image data, looked up
//! through a secondary index on `hash_id`. Older records carry no format tag
//! and are keyed by 32-char MD5 hex instead of SHA-256.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::DocumentConfig;
use crate::error::{AppError, Result};
use crate::response::base64;
use crate::storage::{ContentKey, ImageFormat, ImageSubstrate, StoredImage};

/// Image record as kept in the document store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDocument {
    pub hash_id: String,
    /// Base64 encoded image bytes
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Key-value view of a document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, hash_id: &str) -> Result<Option<ImageDocument>>;

    /// Create a record; returns false when one with the same hash already exists
    async fn create(&self, document: ImageDocument) -> Result<bool>;

    async fn delete(&self, hash_id: &str) -> Result<bool>;
}

/// Process-local document store
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, ImageDocument>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, hash_id: &str) -> Result<Option<ImageDocument>> {
        Ok(self.documents.get(hash_id).map(|d| d.clone()))
    }

    async fn create(&self, document: ImageDocument) -> Result<bool> {
        match self.documents.entry(document.hash_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(document);
                Ok(true)
            }
        }
    }

    async fn delete(&self, hash_id: &str) -> Result<bool> {
        Ok(self.documents.remove(hash_id).is_some())
    }
}

/// REST document store: `GET|PUT|DELETE {endpoint}/{collection}/{hash_id}`
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    secret: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(config: &DocumentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.collection
            ),
            secret: config.secret.clone(),
        })
    }

    fn url(&self, hash_id: &str) -> String {
        format!("{}/{}", self.base_url, hash_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.secret {
            Some(secret) => request.bearer_auth(secret),
            None => request,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, hash_id: &str) -> Result<Option<ImageDocument>> {
        let response = self
            .authorize(self.client.get(self.url(hash_id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document = response.error_for_status()?.json::<ImageDocument>().await?;
        Ok(Some(document))
    }

    async fn create(&self, document: ImageDocument) -> Result<bool> {
        let response = self
            .authorize(self.client.put(self.url(&document.hash_id)))
            .json(&document)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn delete(&self, hash_id: &str) -> Result<bool> {
        let response = self
            .authorize(self.client.delete(self.url(hash_id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }
}

/// Adapts a [`DocumentStore`] to the result store
pub struct DocumentSubstrate {
    documents: Arc<dyn DocumentStore>,
}

impl DocumentSubstrate {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl ImageSubstrate for DocumentSubstrate {
    fn name(&self) -> &str {
        "document"
    }

    async fn load(
        &self,
        key: &ContentKey,
        _preferred: Option<ImageFormat>,
    ) -> Result<Option<StoredImage>> {
        let Some(document) = self.documents.get(key.as_str()).await? else {
            return Ok(None);
        };

        let bytes = base64::decode(&document.data).map_err(|e| {
            AppError::Storage(format!("Corrupt document for {}: {}", key, e))
        })?;
        let format = document
            .format
            .or_else(|| ImageFormat::detect(&bytes))
            .unwrap_or(ImageFormat::Png);

        Ok(Some(StoredImage {
            key: key.clone(),
            bytes,
            format,
        }))
    }

    async fn contains(&self, key: &ContentKey) -> Result<bool> {
        Ok(self.documents.get(key.as_str()).await?.is_some())
    }

    fn serves_legacy_keys(&self) -> bool {
        true
    }

    async fn store(&self, image: &StoredImage) -> Result<bool> {
        let created = self
            .documents
            .create(ImageDocument {
                hash_id: image.key.to_string(),
                data: base64::encode(&image.bytes),
                format: Some(image.format),
                created_at: Some(Utc::now()),
            })
            .await?;

        debug!(key = %image.key, created = created, "Stored image document");
        Ok(created)
    }

    async fn remove(&self, key: &ContentKey) -> Result<bool> {
        self.documents.delete(key.as_str()).await
    }
}
