//! Shared dependencies of every pipeline component.

use std::sync::Arc;

use fanout_core::pricing::RateTable;
use fanout_db::Store;
use fanout_events::{EventBus, Notifier};
use fanout_providers::fetch::ImageFetcher;
use fanout_providers::gallery::Gallery;
use fanout_providers::packaging::{Packager, ZipPackager};
use fanout_providers::{BlobStore, ImageGenerator};

use crate::config::PipelineConfig;

/// Store, bus, collaborators and configuration, built once at startup and
/// shared by the task factory, executors, aggregator and reconciler.
///
/// Cloning is cheap: every field is reference-counted.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub generator: Arc<dyn ImageGenerator>,
    pub blobs: Arc<dyn BlobStore>,
    pub packager: Arc<dyn Packager>,
    /// Needed only for providers that return URLs rather than inline data.
    pub fetcher: Option<Arc<dyn ImageFetcher>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub gallery: Option<Arc<dyn Gallery>>,
    pub rates: Arc<RateTable>,
    pub config: Arc<PipelineConfig>,
}

impl PipelineContext {
    /// Context with the default rate table and a [`ZipPackager`] writing to
    /// `blobs`. Optional collaborators start unset.
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        generator: Arc<dyn ImageGenerator>,
        blobs: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Self {
        let packager = Arc::new(ZipPackager::new(blobs.clone(), config.zip_max_bytes));
        Self {
            store,
            bus,
            generator,
            blobs,
            packager,
            fetcher: None,
            notifier: None,
            gallery: None,
            rates: Arc::new(RateTable::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_gallery(mut self, gallery: Arc<dyn Gallery>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    pub fn with_packager(mut self, packager: Arc<dyn Packager>) -> Self {
        self.packager = packager;
        self
    }

    pub fn with_rates(mut self, rates: RateTable) -> Self {
        self.rates = Arc::new(rates);
        self
    }
}
