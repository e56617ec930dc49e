//! Content-addressed result storage
//!
//! Images are keyed by the SHA-256 of their bytes and may live in several
//! substrates. Reads walk the substrates in precedence order; writes go to the
//! first one unless some substrate already holds the key. Legacy keys are only
//! looked up in substrates that serve them.

pub mod codec;
pub mod document;
pub mod file;
pub mod key;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{AppError, Result};

pub use codec::ImageFormat;
pub use key::ContentKey;

/// An image as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub key: ContentKey,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

/// One storage backend behind the result store
#[async_trait]
pub trait ImageSubstrate: Send + Sync {
    /// Substrate name for logging
    fn name(&self) -> &str;

    /// Load an image, preferring `preferred` when several variants exist
    async fn load(
        &self,
        key: &ContentKey,
        preferred: Option<ImageFormat>,
    ) -> Result<Option<StoredImage>>;

    /// Whether any variant of the key is present
    async fn contains(&self, key: &ContentKey) -> Result<bool>;

    /// Write-once store; returns false when the variant already existed
    async fn store(&self, image: &StoredImage) -> Result<bool>;

    /// Whether additional format variants of an existing key can be stored
    fn supports_variants(&self) -> bool {
        false
    }

    /// Whether records keyed by legacy (pre SHA-256) keys can live here
    fn serves_legacy_keys(&self) -> bool {
        false
    }

    /// Remove every variant of the key; returns false when nothing was there
    async fn remove(&self, key: &ContentKey) -> Result<bool>;
}

/// Idempotent image store over ordered substrates
pub struct ResultStore {
    substrates: Vec<Arc<dyn ImageSubstrate>>,
    persist_transcoded: bool,
}

impl ResultStore {
    /// Create a store; the first substrate takes writes and is read first
    pub fn new(substrates: Vec<Arc<dyn ImageSubstrate>>) -> Result<Self> {
        if substrates.is_empty() {
            return Err(AppError::Storage(
                "result store needs at least one substrate".to_string(),
            ));
        }
        Ok(Self {
            substrates,
            persist_transcoded: true,
        })
    }

    pub fn with_persist_transcoded(mut self, persist: bool) -> Self {
        self.persist_transcoded = persist;
        self
    }

    /// Build the substrates named in configuration, filesystem first
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut substrates: Vec<Arc<dyn ImageSubstrate>> = Vec::new();

        if let Some(fs) = &config.filesystem {
            substrates.push(Arc::new(file::FileSubstrate::new(&fs.base_path)));
        }
        if let Some(doc) = &config.document {
            let documents = document::HttpDocumentStore::new(doc)?;
            substrates.push(Arc::new(document::DocumentSubstrate::new(Arc::new(documents))));
        }

        info!(
            substrates = ?substrates.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            "Initialized result store"
        );

        Ok(Self::new(substrates)?.with_persist_transcoded(config.persist_transcoded))
    }

    /// Persist bytes and return their key. Repeated puts are no-ops.
    pub async fn put(&self, bytes: Vec<u8>, format: ImageFormat) -> Result<ContentKey> {
        let key = ContentKey::hash(&bytes);
        let primary = &self.substrates[0];

        if primary.contains(&key).await? {
            debug!(key = %key, substrate = primary.name(), "Image already stored");
            return Ok(key);
        }

        // Secondary substrates only spare a duplicate write; an outage there must
        // not keep the image out of the primary.
        for substrate in &self.substrates[1..] {
            match substrate.contains(&key).await {
                Ok(true) => {
                    debug!(key = %key, substrate = substrate.name(), "Image already stored");
                    return Ok(key);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        key = %key,
                        substrate = substrate.name(),
                        error = %e,
                        "Substrate lookup failed, treating key as absent"
                    );
                }
            }
        }

        let image = StoredImage {
            key: key.clone(),
            bytes,
            format,
        };
        let written = primary.store(&image).await?;

        debug!(
            key = %key,
            substrate = primary.name(),
            format = format.extension(),
            written = written,
            size = image.bytes.len(),
            "Stored image"
        );

        Ok(key)
    }

    /// Substrates a key may live in, in precedence order
    fn substrates_for<'a>(
        &'a self,
        key: &'a ContentKey,
    ) -> impl Iterator<Item = &'a Arc<dyn ImageSubstrate>> + 'a {
        self.substrates
            .iter()
            .filter(move |s| !key.is_legacy() || s.serves_legacy_keys())
    }

    /// Look up an image, transcoding to `requested` when only another format exists
    pub async fn get(
        &self,
        key: &ContentKey,
        requested: Option<ImageFormat>,
    ) -> Result<StoredImage> {
        for substrate in self.substrates_for(key) {
            let Some(found) = substrate.load(key, requested).await? else {
                continue;
            };

            let target = match requested {
                Some(target) if target != found.format => target,
                _ => return Ok(found),
            };

            debug!(
                key = %key,
                from = found.format.extension(),
                to = target.extension(),
                "Transcoding stored image"
            );
            let source = found.bytes;
            let bytes = tokio::task::spawn_blocking(move || codec::transcode(&source, target))
                .await
                .map_err(|e| AppError::Internal(format!("Transcode task failed: {}", e)))??;

            let converted = StoredImage {
                key: key.clone(),
                bytes,
                format: target,
            };

            if self.persist_transcoded && substrate.supports_variants() {
                if let Err(e) = substrate.store(&converted).await {
                    warn!(key = %key, error = %e, "Failed to persist transcoded variant");
                }
            }

            return Ok(converted);
        }

        Err(AppError::ImageNotFound(key.to_string()))
    }

    /// Remove a key from every substrate
    pub async fn purge(&self, key: &ContentKey) -> Result<()> {
        let mut removed = false;
        for substrate in self.substrates_for(key) {
            removed |= substrate.remove(key).await?;
        }

        if removed {
            info!(key = %key, "Purged image");
            Ok(())
        } else {
            Err(AppError::ImageNotFound(key.to_string()))
        }
    }
}
