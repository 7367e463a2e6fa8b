//! External collaborators of the generation engine.
//!
//! Each concern is a narrow async trait plus at least one real
//! implementation:
//!
//! - [`generation::ImageGenerator`]: text-to-image providers over HTTP.
//! - [`retry::RetryingGenerator`]: jittered-backoff wrapper for any generator.
//! - [`fetch::ImageFetcher`]: download of provider-hosted results.
//! - [`storage::BlobStore`]: S3 or in-memory object storage.
//! - [`packaging::Packager`]: ZIP archive of a task's images.
//! - [`gallery::Gallery`]: public gallery publication.

pub mod fetch;
pub mod gallery;
pub mod generation;
pub mod http;
pub mod packaging;
pub mod retry;
pub mod storage;

pub use generation::{GeneratedImage, GenerationOutput, GenerationRequest, ImageGenerator, ProviderError};
pub use storage::{BlobStore, StorageError};
