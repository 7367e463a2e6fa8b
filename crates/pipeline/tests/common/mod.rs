//! Shared fakes and helpers for the engine's scenario tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fanout_core::retry::BackoffConfig;
use fanout_core::types::{DbId, Points};
use fanout_db::models::status::TaskStatus;
use fanout_db::models::task::Task;
use fanout_db::models::user::{CreateUser, User};
use fanout_db::{InMemoryStore, Store};
use fanout_events::delivery::email::EmailError;
use fanout_events::{EventBus, Notifier, PipelineEvent};
use fanout_pipeline::dispatch::handle_event;
use fanout_pipeline::{CreateTaskRequest, PipelineConfig, PipelineContext};
use fanout_providers::gallery::{Gallery, GalleryEntry, GalleryError};
use fanout_providers::storage::InMemoryBlobStore;
use fanout_providers::{
    BlobStore, GeneratedImage, GenerationOutput, GenerationRequest, ImageGenerator,
    ProviderError, StorageError,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Eight-byte PNG signature, base64 encoded.
pub const PNG_B64: &str = "iVBORw0KGgo=";

pub const PROMPT: &str = "a lighthouse on a cliff at dusk";

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generator that succeeds with one inline PNG unless the model is marked
/// as failing.
#[derive(Default)]
pub struct FakeGenerator {
    failing: HashMap<String, Option<u16>>,
    delay: Duration,
    calls: AtomicUsize,
    calls_by_model: Mutex<HashMap<String, usize>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call for `model_id` fails with `status`.
    pub fn failing(mut self, model_id: &str, status: Option<u16>) -> Self {
        self.failing.insert(model_id.to_string(), status);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, model_id: &str) -> usize {
        self.calls_by_model
            .lock()
            .unwrap()
            .get(model_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_model
            .lock()
            .unwrap()
            .entry(request.model_id.clone())
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(status) = self.failing.get(&request.model_id) {
            return Err(ProviderError::new(*status, "upstream unavailable"));
        }
        Ok(GenerationOutput {
            images: vec![GeneratedImage::base64(PNG_B64)],
            model_id: request.model_id.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier and gallery
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<(), EmailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingGallery {
    pub published: Mutex<Vec<(DbId, usize)>>,
}

#[async_trait]
impl Gallery for RecordingGallery {
    async fn publish(&self, entry: &GalleryEntry<'_>) -> Result<usize, GalleryError> {
        self.published
            .lock()
            .unwrap()
            .push((entry.task_id, entry.image_urls.len()));
        Ok(entry.image_urls.len())
    }
}

/// Notifier whose SMTP relay is always down.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _to: &str, _subject: &str, _html: &str) -> Result<(), EmailError> {
        Err(EmailError::Build("relay unreachable".into()))
    }
}

/// Gallery that rejects every publish.
pub struct FailingGallery;

#[async_trait]
impl Gallery for FailingGallery {
    async fn publish(&self, _entry: &GalleryEntry<'_>) -> Result<usize, GalleryError> {
        Err(GalleryError::HttpStatus(503))
    }
}

// ---------------------------------------------------------------------------
// Blob storage
// ---------------------------------------------------------------------------

/// Blob store whose first `n` uploads fail; everything else goes to `inner`.
pub struct FlakyBlobStore {
    inner: Arc<InMemoryBlobStore>,
    failures_left: AtomicUsize,
}

impl FlakyBlobStore {
    pub fn failing_first(inner: Arc<InMemoryBlobStore>, n: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        path: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Backend(format!("bucket rejected {path}")));
        }
        self.inner.put(bytes, path, content_type).await
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(url).await
    }

    async fn delete(&self, prefix: &str) -> Result<u64, StorageError> {
        self.inner.delete(prefix).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ctx: PipelineContext,
    pub store: Arc<InMemoryStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub generator: Arc<FakeGenerator>,
    pub notifier: Arc<RecordingNotifier>,
    pub gallery: Arc<RecordingGallery>,
}

/// Config with no retry delays.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        job_retry_backoff: BackoffConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            ..BackoffConfig::default()
        },
        provider_timeout: Duration::from_secs(5),
        storage_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

pub fn harness(generator: FakeGenerator) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let blobs = Arc::new(InMemoryBlobStore::default());
    let generator = Arc::new(generator);
    let notifier = Arc::new(RecordingNotifier::default());
    let gallery = Arc::new(RecordingGallery::default());

    let ctx = PipelineContext::new(
        store.clone(),
        Arc::new(EventBus::default()),
        generator.clone(),
        blobs.clone(),
        test_config(),
    )
    .with_notifier(notifier.clone())
    .with_gallery(gallery.clone());

    Harness {
        ctx,
        store,
        blobs,
        generator,
        notifier,
        gallery,
    }
}

impl Harness {
    pub async fn user(&self, points: Points) -> User {
        self.store
            .create_user(&CreateUser {
                email: format!("user{points}@example.com"),
                display_name: Some("Ada".into()),
                initial_points: points,
            })
            .await
            .unwrap()
    }

    pub async fn task(&self, task_id: DbId) -> Task {
        self.store.find_task(task_id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, user_id: DbId) -> Points {
        self.store.find_user(user_id).await.unwrap().unwrap().points
    }

    /// Handle bus events one at a time until the bus stays quiet.
    ///
    /// Retries re-announce jobs from a spawned task, so an empty channel is
    /// only trusted after a short pause.
    pub async fn drain(&self, rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut seen = Vec::new();
        let mut quiet_rounds = 0;
        while quiet_rounds < 5 {
            match rx.try_recv() {
                Ok(event) => {
                    quiet_rounds = 0;
                    seen.push(event.clone());
                    handle_event(&self.ctx, event).await;
                }
                Err(TryRecvError::Empty) => {
                    quiet_rounds += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("bus receive failed: {e}"),
            }
        }
        seen
    }

    /// Poll until the task is final or the deadline passes.
    pub async fn wait_final(&self, task_id: DbId) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = self.task(task_id).await;
            if task.status.is_final() {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} not finalized, status {}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Every points-conserving relation a finalized task must satisfy.
    pub async fn assert_conserved(&self, task_id: DbId) {
        let task = self.task(task_id).await;
        assert!(task.status.is_final());
        let jobs = self.store.list_jobs(task_id).await.unwrap();
        let completed_cost: Points = jobs
            .iter()
            .filter(|j| j.status == fanout_db::models::status::JobStatus::Completed)
            .map(|j| j.points_cost)
            .sum();
        assert_eq!(task.refunded_points + completed_cost, task.total_points);
        if completed_cost == 0 {
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.refunded_points, task.total_points);
        }
    }
}

pub fn request(user_id: DbId, models: &[(&str, u32)]) -> CreateTaskRequest {
    CreateTaskRequest {
        user_id,
        prompt: PROMPT.to_string(),
        selected_models: models
            .iter()
            .map(|(m, n)| (m.to_string(), *n))
            .collect::<BTreeMap<_, _>>(),
    }
}
