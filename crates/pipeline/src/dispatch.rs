//! Event dispatcher: turns bus messages into executor and aggregator calls.
//!
//! Each event is handled on its own Tokio task; a semaphore caps how many
//! run at once. Handler errors are logged and dropped, since every handler
//! is idempotent and the reconciler recovers anything left behind.

use std::sync::Arc;

use fanout_events::PipelineEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{on_job_status_changed, AggregationOutcome};
use crate::context::PipelineContext;
use crate::executor::execute_job;

/// Route one event to its handler and log the result.
pub async fn handle_event(ctx: &PipelineContext, event: PipelineEvent) {
    match event {
        PipelineEvent::JobCreated { task_id, job_id } => {
            if let Err(e) = execute_job(ctx, job_id).await {
                tracing::error!(task_id, job_id, error = %e, "Job execution failed");
            }
        }
        PipelineEvent::JobStatusChanged {
            task_id,
            job_id,
            old,
            new,
        } => match on_job_status_changed(ctx, task_id, job_id, old, new).await {
            Ok(AggregationOutcome::Finalized(report)) => {
                tracing::debug!(
                    task_id,
                    email = ?report.email,
                    gallery = ?report.gallery,
                    archive = ?report.archive,
                    "Finalization side effects",
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(task_id, job_id, error = %e, "Aggregation failed");
            }
        },
        PipelineEvent::TaskFinalized { .. } => {}
    }
}

/// Long-lived consumer of the event bus.
pub struct Dispatcher {
    ctx: PipelineContext,
    receiver: broadcast::Receiver<PipelineEvent>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl Dispatcher {
    /// Subscribe now, so events published after this call are not missed.
    pub fn new(ctx: PipelineContext) -> Self {
        let concurrency = ctx.config.worker_concurrency.max(1);
        Self {
            receiver: ctx.bus.subscribe(),
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            ctx,
        }
    }

    /// Run until `cancel` is triggered, then wait for in-flight handlers.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(concurrency = self.concurrency, "Event dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event dispatcher shutting down");
                    break;
                }
                received = self.receiver.recv() => match received {
                    Ok(event) => self.spawn(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            missed,
                            "Dispatcher lagged; pending jobs will be redelivered by the reconciler",
                        );
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event bus closed");
                        break;
                    }
                },
            }
        }

        let _ = self.permits.acquire_many(self.concurrency as u32).await;
        tracing::info!("Event dispatcher stopped");
    }

    async fn spawn(&self, event: PipelineEvent) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handle_event(&ctx, event).await;
        });
    }
}
