//! Build a [`PipelineContext`] from the process environment.
//!
//! | Variable       | Effect when set                         | When unset          |
//! |----------------|-----------------------------------------|---------------------|
//! | `DATABASE_URL` | PostgreSQL store, migrations applied    | in-memory store     |
//! | `S3_BUCKET`    | S3 blob storage                         | in-memory blobs     |
//! | `SMTP_HOST`    | completion emails                       | no emails           |
//! | `GALLERY_WEBHOOK_URL` | public gallery publication       | no gallery          |
//!
//! Provider endpoints are read by [`ProviderConfig::from_env`] and engine
//! tunables by [`PipelineConfig::from_env`].

use std::sync::Arc;

use fanout_core::retry::BackoffConfig;
use fanout_db::{DbPool, InMemoryStore, PgStore, Store};
use fanout_events::{EmailConfig, EmailDelivery, EventBus};
use fanout_providers::fetch::HttpImageFetcher;
use fanout_providers::gallery::WebhookGallery;
use fanout_providers::http::{HttpImageGenerator, ProviderConfig};
use fanout_providers::retry::RetryingGenerator;
use fanout_providers::storage::{InMemoryBlobStore, S3BlobStore, S3Config};
use fanout_providers::BlobStore;

use crate::config::PipelineConfig;
use crate::context::PipelineContext;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    Database(String),

    #[error("database migrations failed: {0}")]
    Migrations(String),

    #[error("HTTP client setup failed: {0}")]
    Http(String),

    #[error("email transport setup failed: {0}")]
    Email(String),
}

/// A ready engine plus the database pool behind it, if any.
pub struct Runtime {
    pub context: PipelineContext,
    pub pool: Option<DbPool>,
}

/// Assemble the engine on `bus`.
pub async fn from_env(bus: Arc<EventBus>) -> Result<Runtime, BootstrapError> {
    let config = PipelineConfig::from_env();

    let (store, pool): (Arc<dyn Store>, Option<DbPool>) = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = fanout_db::create_pool(&url)
                .await
                .map_err(|e| BootstrapError::Database(e.to_string()))?;
            fanout_db::health_check(&pool)
                .await
                .map_err(|e| BootstrapError::Database(e.to_string()))?;
            fanout_db::run_migrations(&pool)
                .await
                .map_err(|e| BootstrapError::Migrations(e.to_string()))?;
            tracing::info!("PostgreSQL store ready, migrations applied");
            (Arc::new(PgStore::new(pool.clone())), Some(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            (Arc::new(InMemoryStore::new()), None)
        }
    };

    let blobs: Arc<dyn BlobStore> = match S3Config::from_env() {
        Some(s3) => {
            tracing::info!(bucket = %s3.bucket, "S3 blob storage configured");
            Arc::new(S3BlobStore::connect(s3).await)
        }
        None => {
            tracing::warn!("S3_BUCKET not set; images are kept in memory");
            Arc::new(InMemoryBlobStore::default())
        }
    };

    let providers = ProviderConfig::from_env();
    if providers.is_empty() {
        tracing::warn!("No provider endpoints configured; every job will fail");
    } else {
        tracing::info!(providers = providers.endpoints.len(), "Provider endpoints configured");
    }
    let generator = HttpImageGenerator::new(providers)
        .map_err(|e| BootstrapError::Http(e.to_string()))?;
    let generator = RetryingGenerator::new(generator, BackoffConfig::default());
    let fetcher = HttpImageFetcher::new().map_err(|e| BootstrapError::Http(e.to_string()))?;

    let mut context = PipelineContext::new(store, bus, Arc::new(generator), blobs, config)
        .with_fetcher(Arc::new(fetcher));

    if let Some(email) = EmailConfig::from_env() {
        let delivery = EmailDelivery::new(email).map_err(|e| BootstrapError::Email(e.to_string()))?;
        context = context.with_notifier(Arc::new(delivery));
        tracing::info!("Completion emails enabled");
    }

    if let Some(gallery) = WebhookGallery::from_env() {
        let gallery = gallery.map_err(|e| BootstrapError::Http(e.to_string()))?;
        context = context.with_gallery(Arc::new(gallery));
        tracing::info!("Gallery publication enabled");
    }

    Ok(Runtime { context, pool })
}
