//! Time-based recovery.
//!
//! A sweep force-fails the outstanding jobs of every task past its
//! deadline and finalizes it through the same path the aggregator uses,
//! then re-announces jobs that have sat `pending` too long so a lost
//! `JobCreated` message only delays work. Open tasks whose jobs have all
//! settled are finalized as well, covering a lost `JobStatusChanged`. Safe to run concurrently with the
//! aggregator and with other sweeps: every write is a compare-and-swap.

use chrono::Utc;
use fanout_core::types::DbId;
use fanout_events::PipelineEvent;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::finalize::{try_finalize, FinalizationReport, FinalizeTrigger};

/// Message written on jobs failed by the deadline sweep.
pub const TIMEOUT_MESSAGE: &str = "Timed out: task exceeded its processing deadline";

/// Stale tasks finalized concurrently within one sweep.
const SWEEP_PARALLELISM: usize = 8;

/// What one sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub stale_tasks: usize,
    pub jobs_force_failed: usize,
    pub tasks_finalized: usize,
    /// Settled tasks finalized without force-failing anything.
    pub tasks_settled: usize,
    pub jobs_redelivered: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stale_tasks == 0 && self.tasks_settled == 0 && self.jobs_redelivered == 0
    }
}

/// Fail every outstanding job of `task_id` with `reason`, announce each
/// change, and finalize.
///
/// Returns the report when this call won the finalization.
pub async fn force_finalize(
    ctx: &PipelineContext,
    task_id: DbId,
    reason: &str,
    trigger: FinalizeTrigger,
) -> Result<(usize, Option<FinalizationReport>), PipelineError> {
    let failed = ctx.store.force_fail_outstanding(task_id, reason).await?;
    for transition in &failed {
        ctx.bus.publish(PipelineEvent::JobStatusChanged {
            task_id,
            job_id: transition.job.id,
            old: transition.previous,
            new: transition.job.status,
        });
    }
    if !failed.is_empty() {
        tracing::warn!(task_id, jobs = failed.len(), reason, "Outstanding jobs force-failed");
    }
    let report = try_finalize(ctx, task_id, trigger).await?;
    Ok((failed.len(), report))
}

/// One reconciliation pass.
pub async fn sweep(ctx: &PipelineContext) -> Result<SweepReport, PipelineError> {
    let mut report = SweepReport::default();
    let now = Utc::now();
    let batch = ctx.config.reconcile_batch;

    let deadline = chrono::Duration::from_std(ctx.config.task_timeout)
        .map_err(|e| PipelineError::Internal(e.to_string()))?;
    let stale = ctx.store.list_stale_tasks(now - deadline, batch).await?;
    report.stale_tasks = stale.len();

    for chunk in stale.chunks(SWEEP_PARALLELISM) {
        let results = join_all(chunk.iter().map(|task| {
            force_finalize(ctx, task.id, TIMEOUT_MESSAGE, FinalizeTrigger::Timeout)
        }))
        .await;

        for (task, result) in chunk.iter().zip(results) {
            match result {
                Ok((failed, finalized)) => {
                    report.jobs_force_failed += failed;
                    if finalized.is_some() {
                        report.tasks_finalized += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(task_id = task.id, error = %e, "Failed to reconcile stale task");
                }
            }
        }
    }

    let redeliver_after = chrono::Duration::from_std(ctx.config.redeliver_after)
        .map_err(|e| PipelineError::Internal(e.to_string()))?;

    let open = ctx
        .store
        .list_stale_tasks(now - redeliver_after, batch)
        .await?;
    for task in &open {
        match try_finalize(ctx, task.id, FinalizeTrigger::JobsSettled).await {
            Ok(Some(_)) => {
                report.tasks_settled += 1;
                tracing::warn!(task_id = task.id, "Settled task was still open, finalized by sweep");
            }
            Ok(None) => {}
            Err(e) => {
                report.errors += 1;
                tracing::error!(task_id = task.id, error = %e, "Failed to finalize settled task");
            }
        }
    }

    let waiting = ctx
        .store
        .list_pending_jobs_before(now - redeliver_after, batch)
        .await?;
    for job in &waiting {
        ctx.bus.publish(PipelineEvent::JobCreated {
            task_id: job.task_id,
            job_id: job.id,
        });
    }
    report.jobs_redelivered = waiting.len();

    Ok(report)
}

/// Run [`sweep`] every `reconcile_interval` until `cancel` is triggered.
pub async fn run(ctx: PipelineContext, cancel: CancellationToken) {
    let interval_secs = ctx.config.reconcile_interval.as_secs();
    tracing::info!(
        interval_secs,
        task_timeout_secs = ctx.config.task_timeout.as_secs(),
        "Reconciler started",
    );

    let mut interval = tokio::time::interval(ctx.config.reconcile_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconciler stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep(&ctx).await {
                    Ok(report) if report.is_empty() => {
                        tracing::debug!("Reconciler: nothing to do");
                    }
                    Ok(report) => {
                        tracing::info!(
                            stale_tasks = report.stale_tasks,
                            jobs_force_failed = report.jobs_force_failed,
                            tasks_finalized = report.tasks_finalized,
                            tasks_settled = report.tasks_settled,
                            jobs_redelivered = report.jobs_redelivered,
                            errors = report.errors,
                            "Reconciler sweep finished",
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reconciler sweep failed");
                    }
                }
            }
        }
    }
}
