//! ZIP packaging of a finished task's images.
//!
//! Images are read back from the blob store in order and added until the
//! cumulative byte budget would be exceeded; the rest are left out and the
//! archive records the truncation.

use std::io::{Cursor, Write};
use std::sync::Arc;

use async_trait::async_trait;
use fanout_core::types::DbId;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::storage::{BlobStore, StorageError};

/// Default cumulative byte budget (500 MB).
pub const DEFAULT_MAX_ZIP_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("no images to package")]
    Empty,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packaging task failed: {0}")]
    Join(String),
}

/// An uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub url: String,
    pub included: usize,
    pub skipped: usize,
    pub bytes: u64,
}

impl PackagedArchive {
    pub fn truncated(&self) -> bool {
        self.skipped > 0
    }
}

#[async_trait]
pub trait Packager: Send + Sync {
    async fn build_zip(
        &self,
        task_id: DbId,
        image_urls: &[String],
    ) -> Result<PackagedArchive, PackagingError>;
}

/// Builds archives in memory and uploads them next to the images.
pub struct ZipPackager {
    blobs: Arc<dyn BlobStore>,
    max_bytes: u64,
}

impl ZipPackager {
    pub fn new(blobs: Arc<dyn BlobStore>, max_bytes: u64) -> Self {
        Self { blobs, max_bytes }
    }
}

/// File extension for an archive entry, taken from the source URL.
fn extension_of(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or("png")
}

fn write_archive(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, PackagingError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

#[async_trait]
impl Packager for ZipPackager {
    async fn build_zip(
        &self,
        task_id: DbId,
        image_urls: &[String],
    ) -> Result<PackagedArchive, PackagingError> {
        if image_urls.is_empty() {
            return Err(PackagingError::Empty);
        }

        let mut entries = Vec::with_capacity(image_urls.len());
        let mut total: u64 = 0;
        for (i, url) in image_urls.iter().enumerate() {
            let bytes = self.blobs.get(url).await?;
            let size = bytes.len() as u64;
            if total + size > self.max_bytes {
                tracing::warn!(
                    task_id,
                    included = entries.len(),
                    skipped = image_urls.len() - i,
                    max_bytes = self.max_bytes,
                    "ZIP byte budget reached, truncating archive",
                );
                break;
            }
            total += size;
            entries.push((format!("image_{:03}.{}", i + 1, extension_of(url)), bytes));
        }

        if entries.is_empty() {
            return Err(PackagingError::Empty);
        }

        let included = entries.len();
        let archive = tokio::task::spawn_blocking(move || write_archive(entries))
            .await
            .map_err(|e| PackagingError::Join(e.to_string()))??;

        let url = self
            .blobs
            .put(archive, &format!("tasks/{task_id}/images.zip"), "application/zip")
            .await?;

        Ok(PackagedArchive {
            url,
            included,
            skipped: image_urls.len() - included,
            bytes: total,
        })
    }
}
