//! Job execution: claim, generate, upload, record.
//!
//! One call handles one `JobCreated` delivery. The claim is a
//! `pending -> processing` compare-and-swap, so duplicate deliveries of the
//! same job never reach the generator twice. Every write after the claim is
//! conditional on the job still being `processing`; if the reconciler or a
//! cancellation failed the job meanwhile, the result is discarded.

use fanout_core::retry::{decide, RetryDecision};
use fanout_core::types::DbId;
use fanout_db::models::job::Job;
use fanout_db::models::status::JobStatus;
use fanout_events::PipelineEvent;
use fanout_providers::generation::decode_base64_image;
use fanout_providers::{GeneratedImage, GenerationRequest, ProviderError, StorageError};

use crate::context::PipelineContext;
use crate::error::PipelineError;

/// What one execution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Nothing to do: the job is missing, not `pending`, or its task is closed.
    Skipped { reason: &'static str },
    Completed { image_urls: Vec<String> },
    /// Reset to `pending` for another attempt.
    Requeued { retries: u32, error: String },
    Failed { error: String },
    /// The job left `processing` while we worked; our result was dropped.
    Discarded,
}

/// Failure of a single attempt.
#[derive(Debug)]
enum AttemptError {
    Provider(ProviderError),
    Storage(StorageError),
}

impl AttemptError {
    fn message(&self) -> String {
        match self {
            Self::Provider(e) => e.to_string(),
            Self::Storage(e) => format!("storage error: {e}"),
        }
    }

    /// Storage failures and client errors (4xx other than 408/429) end the
    /// job now; anything else gets an in-place retry while budget remains.
    fn is_terminal(&self) -> bool {
        match self {
            Self::Storage(_) => true,
            Self::Provider(e) => {
                matches!(e.status, Some(s) if (400..500).contains(&s) && s != 408 && s != 429)
            }
        }
    }
}

/// Handle one `JobCreated` delivery for `job_id`.
pub async fn execute_job(
    ctx: &PipelineContext,
    job_id: DbId,
) -> Result<ExecutionOutcome, PipelineError> {
    let Some(job) = ctx.store.find_job(job_id).await? else {
        tracing::warn!(job_id, "Job not found, ignoring delivery");
        return Ok(ExecutionOutcome::Skipped {
            reason: "job not found",
        });
    };
    if job.status != JobStatus::Pending {
        tracing::debug!(job_id, status = %job.status, "Job not pending, ignoring delivery");
        return Ok(ExecutionOutcome::Skipped {
            reason: "job not pending",
        });
    }
    let task_open = ctx
        .store
        .find_task(job.task_id)
        .await?
        .is_some_and(|t| !t.status.is_final());
    if !task_open {
        tracing::warn!(job_id, task_id = job.task_id, "Task is closed, not executing job");
        return Ok(ExecutionOutcome::Skipped {
            reason: "task closed",
        });
    }

    let Some(job) = ctx.store.claim_job(job_id).await? else {
        tracing::debug!(job_id, "Job claimed by another executor");
        return Ok(ExecutionOutcome::Skipped {
            reason: "claimed elsewhere",
        });
    };
    announce(ctx, &job, JobStatus::Pending, JobStatus::Processing);
    tracing::info!(
        job_id,
        task_id = job.task_id,
        model_id = %job.model_id,
        retries = job.retries,
        "Job started",
    );

    match run_attempt(ctx, &job).await {
        Ok(image_urls) => record_success(ctx, &job, image_urls).await,
        Err(e) if e.is_terminal() => record_failure(ctx, &job, e.message()).await,
        Err(e) => record_retry(ctx, &job, e.message()).await,
    }
}

/// Generate under the provider timeout, then store every returned image.
async fn run_attempt(ctx: &PipelineContext, job: &Job) -> Result<Vec<String>, AttemptError> {
    let request = GenerationRequest {
        prompt: job.prompt.clone(),
        model_id: job.model_id.clone(),
        width: ctx.config.image_width,
        height: ctx.config.image_height,
        reference_image_url: None,
    };

    let timeout = ctx.config.provider_timeout;
    let output = tokio::time::timeout(timeout, ctx.generator.generate(&request))
        .await
        .map_err(|_| {
            AttemptError::Provider(ProviderError::new(
                None,
                format!("generation timed out after {}s", timeout.as_secs()),
            ))
        })?
        .map_err(AttemptError::Provider)?;

    if output.images.is_empty() {
        return Err(AttemptError::Provider(ProviderError::new(
            None,
            "provider returned no images",
        )));
    }

    let mut urls = Vec::with_capacity(output.images.len());
    for (index, image) in output.images.iter().enumerate() {
        let (bytes, content_type) = materialize(ctx, image).await?;
        let path = format!(
            "tasks/{}/jobs/{}/{index}.{}",
            job.task_id,
            job.id,
            extension_for(&content_type)
        );
        let url = tokio::time::timeout(
            ctx.config.storage_timeout,
            ctx.blobs.put(bytes, &path, &content_type),
        )
        .await
        .map_err(|_| AttemptError::Storage(StorageError::Backend("upload timed out".into())))?
        .map_err(AttemptError::Storage)?;
        urls.push(url);
    }
    Ok(urls)
}

/// Turn a provider image into bytes plus content type.
async fn materialize(
    ctx: &PipelineContext,
    image: &GeneratedImage,
) -> Result<(Vec<u8>, String), AttemptError> {
    match image {
        GeneratedImage::Base64 { b64_json } => {
            let decoded = decode_base64_image(b64_json)
                .map_err(|e| AttemptError::Storage(StorageError::Decode(e.to_string())))?;
            Ok((decoded.bytes, decoded.content_type))
        }
        GeneratedImage::Url { url } => {
            let fetcher = ctx.fetcher.as_ref().ok_or_else(|| {
                AttemptError::Storage(StorageError::Download(format!(
                    "no image fetcher configured for {url}"
                )))
            })?;
            let fetched = tokio::time::timeout(ctx.config.storage_timeout, fetcher.fetch(url))
                .await
                .map_err(|_| {
                    AttemptError::Storage(StorageError::Download(format!("{url}: timed out")))
                })?
                .map_err(AttemptError::Storage)?;
            Ok((fetched.bytes, fetched.content_type))
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

fn announce(ctx: &PipelineContext, job: &Job, old: JobStatus, new: JobStatus) {
    ctx.bus.publish(PipelineEvent::JobStatusChanged {
        task_id: job.task_id,
        job_id: job.id,
        old,
        new,
    });
}

async fn record_success(
    ctx: &PipelineContext,
    job: &Job,
    image_urls: Vec<String>,
) -> Result<ExecutionOutcome, PipelineError> {
    if ctx.store.complete_job(job.id, &image_urls).await?.is_none() {
        discard_uploads(ctx, job).await;
        return Ok(ExecutionOutcome::Discarded);
    }
    announce(ctx, job, JobStatus::Processing, JobStatus::Completed);
    tracing::info!(
        job_id = job.id,
        task_id = job.task_id,
        images = image_urls.len(),
        "Job completed",
    );
    Ok(ExecutionOutcome::Completed { image_urls })
}

async fn record_retry(
    ctx: &PipelineContext,
    job: &Job,
    error: String,
) -> Result<ExecutionOutcome, PipelineError> {
    let retries = u32::try_from(job.retries).unwrap_or(0);
    let next_retries = match decide(retries, ctx.config.max_retries) {
        RetryDecision::RetryInPlace { next_retries } => next_retries,
        RetryDecision::Exhausted => return record_failure(ctx, job, error).await,
    };

    let requeued = ctx
        .store
        .requeue_job(job.id, next_retries as i32, &error)
        .await?;
    if requeued.is_none() {
        tracing::info!(job_id = job.id, "Job left processing before retry, dropping");
        return Ok(ExecutionOutcome::Discarded);
    }
    announce(ctx, job, JobStatus::Processing, JobStatus::Pending);
    tracing::warn!(
        job_id = job.id,
        task_id = job.task_id,
        retries = next_retries,
        max_retries = ctx.config.max_retries,
        error = %error,
        "Job attempt failed, requeued in place",
    );

    let delay = ctx.config.job_retry_backoff.delay_for_attempt(next_retries);
    let bus = ctx.bus.clone();
    let (task_id, job_id) = (job.task_id, job.id);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        bus.publish(PipelineEvent::JobCreated { task_id, job_id });
    });

    Ok(ExecutionOutcome::Requeued {
        retries: next_retries,
        error,
    })
}

async fn record_failure(
    ctx: &PipelineContext,
    job: &Job,
    error: String,
) -> Result<ExecutionOutcome, PipelineError> {
    if ctx.store.fail_job(job.id, &error).await?.is_none() {
        tracing::info!(job_id = job.id, "Job left processing before failure was recorded");
        return Ok(ExecutionOutcome::Discarded);
    }
    announce(ctx, job, JobStatus::Processing, JobStatus::Failed);
    tracing::error!(
        job_id = job.id,
        task_id = job.task_id,
        retries = job.retries,
        error = %error,
        "Job failed",
    );
    Ok(ExecutionOutcome::Failed { error })
}

/// Best-effort removal of images uploaded for a job whose result was dropped.
async fn discard_uploads(ctx: &PipelineContext, job: &Job) {
    let prefix = format!("tasks/{}/jobs/{}/", job.task_id, job.id);
    match ctx.blobs.delete(&prefix).await {
        Ok(removed) => tracing::info!(
            job_id = job.id,
            removed,
            "Job left processing before completion; uploads discarded",
        ),
        Err(e) => tracing::warn!(job_id = job.id, error = %e, "Failed to discard uploads"),
    }
}
