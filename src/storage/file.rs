//! Filesystem substrate for stored images

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{ContentKey, ImageFormat, ImageSubstrate, StoredImage};

/// Stores each image as `{base}/{key}.{ext}`.
///
/// Files written before format suffixes were introduced (`{base}/{key}`) are
/// still readable; their format is sniffed from the bytes.
pub struct FileSubstrate {
    storage_path: PathBuf,
}

impl FileSubstrate {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !exists(&self.storage_path).await? {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Full path for one variant of a key
    pub fn variant_path(&self, key: &ContentKey, format: ImageFormat) -> PathBuf {
        self.storage_path
            .join(format!("{}.{}", key, format.extension()))
    }

    fn legacy_path(&self, key: &ContentKey) -> PathBuf {
        self.storage_path.join(key.as_str())
    }

    /// Formats stored for a key, in the order they should be tried
    fn probe_order(preferred: Option<ImageFormat>) -> Vec<ImageFormat> {
        let mut order = Vec::with_capacity(ImageFormat::ALL.len());
        if let Some(format) = preferred {
            order.push(format);
        }
        order.extend(ImageFormat::ALL.iter().copied().filter(|f| Some(*f) != preferred));
        order
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ImageSubstrate for FileSubstrate {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn load(
        &self,
        key: &ContentKey,
        preferred: Option<ImageFormat>,
    ) -> Result<Option<StoredImage>> {
        for format in Self::probe_order(preferred) {
            if let Some(bytes) = read_if_exists(&self.variant_path(key, format)).await? {
                return Ok(Some(StoredImage {
                    key: key.clone(),
                    bytes,
                    format,
                }));
            }
        }

        if let Some(bytes) = read_if_exists(&self.legacy_path(key)).await? {
            let format = ImageFormat::detect(&bytes).unwrap_or(ImageFormat::Png);
            return Ok(Some(StoredImage {
                key: key.clone(),
                bytes,
                format,
            }));
        }

        Ok(None)
    }

    async fn contains(&self, key: &ContentKey) -> Result<bool> {
        for format in ImageFormat::ALL {
            if exists(&self.variant_path(key, format)).await? {
                return Ok(true);
            }
        }
        exists(&self.legacy_path(key)).await
    }

    async fn store(&self, image: &StoredImage) -> Result<bool> {
        self.ensure_storage_dir().await?;

        let final_path = self.variant_path(&image.key, image.format);
        if exists(&final_path).await? {
            return Ok(false);
        }

        // Write to a private temp file, then publish with a hard link: the link
        // fails if the target exists, so readers never see a partial file and
        // concurrent writers of the same key never overwrite each other.
        let tmp_path = self
            .storage_path
            .join(format!(".{}.{}.tmp", image.key, Uuid::new_v4()));
        fs::write(&tmp_path, &image.bytes).await?;

        let published = match fs::hard_link(&tmp_path, &final_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        };
        let _ = fs::remove_file(&tmp_path).await;

        if let Ok(true) = published {
            debug!(path = ?final_path, size = image.bytes.len(), "Saved image file");
        }
        published
    }

    fn supports_variants(&self) -> bool {
        true
    }

    async fn remove(&self, key: &ContentKey) -> Result<bool> {
        let mut removed = false;
        for format in ImageFormat::ALL {
            removed |= remove_if_exists(&self.variant_path(key, format)).await?;
        }
        removed |= remove_if_exists(&self.legacy_path(key)).await?;
        Ok(removed)
    }
}
