//! Public gallery publication.
//!
//! [`WebhookGallery`] posts finished images to an external gallery service.
//! Publication is best-effort: the engine logs failures and moves on.

use std::time::Duration;

use async_trait::async_trait;
use fanout_core::types::DbId;

/// HTTP request timeout for a single publication.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gallery returned HTTP {0}")]
    HttpStatus(u16),
}

/// One finished task's images offered to the gallery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GalleryEntry<'a> {
    pub task_id: DbId,
    pub user_id: DbId,
    pub prompt: &'a str,
    pub image_urls: &'a [String],
}

#[async_trait]
pub trait Gallery: Send + Sync {
    /// Returns the number of images accepted.
    async fn publish(&self, entry: &GalleryEntry<'_>) -> Result<usize, GalleryError>;
}

pub struct WebhookGallery {
    client: reqwest::Client,
    url: String,
}

impl WebhookGallery {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// `GALLERY_WEBHOOK_URL`, or `None` when unset.
    pub fn from_env() -> Option<Result<Self, reqwest::Error>> {
        std::env::var("GALLERY_WEBHOOK_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl Gallery for WebhookGallery {
    async fn publish(&self, entry: &GalleryEntry<'_>) -> Result<usize, GalleryError> {
        let response = self.client.post(&self.url).json(entry).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GalleryError::HttpStatus(status.as_u16()));
        }
        Ok(entry.image_urls.len())
    }
}
