//! Blob storage for generated images and archives.
//!
//! [`BlobStore`] is addressed by path on write and by public URL on read.
//! [`S3BlobStore`] is the production backend; [`InMemoryBlobStore`] keeps
//! objects in process for local runs and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// The URL does not belong to this store.
    #[error("foreign URL: {0}")]
    ForeignUrl(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return the public URL.
    async fn put(&self, bytes: Vec<u8>, path: &str, content_type: &str)
        -> Result<String, StorageError>;

    /// Read back an object by the URL [`BlobStore::put`] returned.
    async fn get(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete every object under `prefix`. Returns the number removed.
    async fn delete(&self, prefix: &str) -> Result<u64, StorageError>;
}

/// Join a base URL and an object key with exactly one slash.
fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Inverse of [`public_url`].
fn key_from_url<'a>(base: &str, url: &'a str) -> Option<&'a str> {
    url.strip_prefix(base.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// S3 bucket configuration.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Base URL objects are served from, e.g. a CDN in front of the bucket.
    pub public_base_url: String,
}

impl S3Config {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `S3_BUCKET` is not set. Credentials and region come
    /// from the standard AWS environment chain.
    ///
    /// | Variable             | Required | Default                                  |
    /// |----------------------|----------|------------------------------------------|
    /// | `S3_BUCKET`          | yes      | none                                     |
    /// | `S3_PUBLIC_BASE_URL` | no       | `https://<bucket>.s3.amazonaws.com`      |
    pub fn from_env() -> Option<Self> {
        let bucket = std::env::var("S3_BUCKET").ok()?;
        let public_base_url = std::env::var("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("https://{bucket}.s3.amazonaws.com"));
        Some(Self {
            bucket,
            public_base_url,
        })
    }
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

impl S3BlobStore {
    /// Build a client from the default AWS configuration chain.
    pub async fn connect(config: S3Config) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            config,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        path: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
        Ok(public_url(&self.config.public_base_url, path))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let key = key_from_url(&self.config.public_base_url, url)
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))?;
        let object = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;

            for key in page.contents().iter().filter_map(|o| o.key()) {
                self.client
                    .delete_object()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| StorageError::Backend(DisplayErrorContext(&e).to_string()))?;
                removed += 1;
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Objects kept in a map keyed by path.
pub struct InMemoryBlobStore {
    base_url: String,
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type recorded for `path`.
    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(_, ct)| ct.clone())
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        path: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(public_url(&self.base_url, path))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let key = key_from_url(&self.base_url, url)
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))?;
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }

    async fn delete(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok((before - objects.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn url_round_trip() {
        let url = public_url("https://cdn.test/", "/tasks/1/a.png");
        assert_eq!(url, "https://cdn.test/tasks/1/a.png");
        assert_eq!(key_from_url("https://cdn.test", &url), Some("tasks/1/a.png"));
        assert_eq!(key_from_url("https://other.test", &url), None);
    }

    #[tokio::test]
    async fn memory_store_put_get_delete() {
        let store = InMemoryBlobStore::new("https://cdn.test");
        let a = store.put(b"a".to_vec(), "tasks/1/a.png", "image/png").await.unwrap();
        store.put(b"b".to_vec(), "tasks/1/b.png", "image/png").await.unwrap();
        store.put(b"c".to_vec(), "tasks/2/c.png", "image/png").await.unwrap();

        assert_eq!(store.get(&a).await.unwrap(), b"a");
        assert_eq!(store.content_type("tasks/1/a.png").as_deref(), Some("image/png"));
        assert_eq!(store.delete("tasks/1/").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_matches!(store.get(&a).await, Err(StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn foreign_urls_are_rejected() {
        let store = InMemoryBlobStore::default();
        assert_matches!(
            store.get("https://elsewhere.test/x.png").await,
            Err(StorageError::ForeignUrl(_))
        );
    }
}
