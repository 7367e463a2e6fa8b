//! Reaction to job status changes: progress bookkeeping, then
//! finalization once the last job settles.

use fanout_core::types::DbId;
use fanout_db::models::status::JobStatus;

use crate::aggregation::JobTally;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::finalize::{try_finalize, FinalizationReport, FinalizeTrigger};

#[derive(Debug, Clone)]
pub enum AggregationOutcome {
    /// Event did not apply (no change, task final).
    Ignored { reason: &'static str },
    /// Progress recorded; the task stays open.
    Progressed { progress: i16 },
    /// This call finalized the task.
    Finalized(Box<FinalizationReport>),
}

/// Handle `JobStatusChanged { task_id, job_id, old, new }`.
pub async fn on_job_status_changed(
    ctx: &PipelineContext,
    task_id: DbId,
    job_id: DbId,
    old: JobStatus,
    new: JobStatus,
) -> Result<AggregationOutcome, PipelineError> {
    if old == new {
        return Ok(AggregationOutcome::Ignored {
            reason: "status unchanged",
        });
    }

    let task = ctx
        .store
        .find_task(task_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "task",
            id: task_id,
        })?;
    if task.status.is_final() {
        return Ok(AggregationOutcome::Ignored {
            reason: "task already final",
        });
    }

    let jobs = ctx.store.list_jobs(task_id).await?;
    let tally = JobTally::from_jobs(&jobs);
    let progress = tally.progress();
    let Some(updated) = ctx
        .store
        .record_progress(task_id, progress, tally.has_started())
        .await?
    else {
        return Ok(AggregationOutcome::Ignored {
            reason: "task already final",
        });
    };
    tracing::debug!(
        task_id,
        job_id,
        old = %old,
        new = %new,
        progress = updated.progress,
        completed = tally.completed,
        failed = tally.failed,
        outstanding = tally.pending + tally.processing,
        "Task progress recorded",
    );

    if !new.is_terminal() || old == JobStatus::Requeued || !tally.covers(task.total_images) {
        return Ok(AggregationOutcome::Progressed {
            progress: updated.progress,
        });
    }

    match try_finalize(ctx, task_id, FinalizeTrigger::JobsSettled).await? {
        Some(report) => Ok(AggregationOutcome::Finalized(Box::new(report))),
        None => Ok(AggregationOutcome::Ignored {
            reason: "finalized elsewhere",
        }),
    }
}
