//! Engine configuration.

use std::time::Duration;

use fanout_core::retry::{BackoffConfig, MAX_RETRIES};
use fanout_providers::packaging::DEFAULT_MAX_ZIP_BYTES;

/// Tunables for the generation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// In-place retries a job gets after its first attempt.
    pub max_retries: u32,
    /// Ceiling on one generation call.
    pub provider_timeout: Duration,
    /// Ceiling on one blob upload or download.
    pub storage_timeout: Duration,
    /// Age after which an open task is force-finalized.
    pub task_timeout: Duration,
    /// How often the reconciler sweeps.
    pub reconcile_interval: Duration,
    /// Age after which a `pending` job is re-announced.
    pub redeliver_after: Duration,
    /// Rows examined per reconciler sweep.
    pub reconcile_batch: i64,
    /// Concurrent event handlers per process.
    pub worker_concurrency: usize,
    /// Byte budget for a task's ZIP archive.
    pub zip_max_bytes: u64,
    /// Seconds per image used for the creation-time estimate.
    pub per_image_seconds: f64,
    /// Delay before a requeued job is re-announced, per retry.
    pub job_retry_backoff: BackoffConfig,
    /// Output size requested from providers.
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            provider_timeout: Duration::from_secs(300),
            storage_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(600),
            reconcile_interval: Duration::from_secs(300),
            redeliver_after: Duration::from_secs(60),
            reconcile_batch: 100,
            worker_concurrency: 16,
            zip_max_bytes: DEFAULT_MAX_ZIP_BYTES,
            per_image_seconds: 5.0,
            job_retry_backoff: BackoffConfig {
                initial_delay: Duration::from_secs(2),
                ..BackoffConfig::default()
            },
            image_width: fanout_core::generation::DEFAULT_WIDTH,
            image_height: fanout_core::generation::DEFAULT_HEIGHT,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                  | Default      |
    /// |---------------------------|--------------|
    /// | `MAX_RETRIES`             | `3`          |
    /// | `PROVIDER_TIMEOUT_SECS`   | `300`        |
    /// | `STORAGE_TIMEOUT_SECS`    | `60`         |
    /// | `TASK_TIMEOUT_SECS`       | `600`        |
    /// | `RECONCILE_INTERVAL_SECS` | `300`        |
    /// | `REDELIVER_AFTER_SECS`    | `60`         |
    /// | `RECONCILE_BATCH`         | `100`        |
    /// | `WORKER_CONCURRENCY`      | `16`         |
    /// | `ZIP_MAX_BYTES`           | `524288000`  |
    /// | `PER_IMAGE_SECONDS`       | `5`          |
    /// | `JOB_RETRY_DELAY_MS`      | `2000`       |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            env_parse::<u64>(name).map(Duration::from_secs).unwrap_or(fallback)
        };
        Self {
            max_retries: env_parse("MAX_RETRIES").unwrap_or(defaults.max_retries),
            provider_timeout: secs("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout),
            storage_timeout: secs("STORAGE_TIMEOUT_SECS", defaults.storage_timeout),
            task_timeout: secs("TASK_TIMEOUT_SECS", defaults.task_timeout),
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            redeliver_after: secs("REDELIVER_AFTER_SECS", defaults.redeliver_after),
            reconcile_batch: env_parse("RECONCILE_BATCH").unwrap_or(defaults.reconcile_batch),
            worker_concurrency: env_parse::<usize>("WORKER_CONCURRENCY")
                .unwrap_or(defaults.worker_concurrency)
                .max(1),
            zip_max_bytes: env_parse("ZIP_MAX_BYTES").unwrap_or(defaults.zip_max_bytes),
            per_image_seconds: env_parse("PER_IMAGE_SECONDS").unwrap_or(defaults.per_image_seconds),
            job_retry_backoff: BackoffConfig {
                initial_delay: env_parse::<u64>("JOB_RETRY_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.job_retry_backoff.initial_delay),
                ..defaults.job_retry_backoff
            },
            ..defaults
        }
    }
}
