//! User-initiated task cancellation.

use fanout_core::types::DbId;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::finalize::{FinalizationReport, FinalizeTrigger};
use crate::reconciler::force_finalize;

/// Message written on jobs failed by a cancellation.
pub const CANCEL_MESSAGE: &str = "Cancelled by user";

/// Cancel an open task owned by `user_id`.
///
/// Jobs already completed keep their images and their cost; every
/// outstanding job is failed and refunded through normal finalization.
/// A task owned by someone else is reported as not found.
pub async fn cancel_task(
    ctx: &PipelineContext,
    task_id: DbId,
    user_id: DbId,
) -> Result<FinalizationReport, PipelineError> {
    let task = ctx
        .store
        .find_task(task_id)
        .await?
        .filter(|t| t.user_id == user_id)
        .ok_or(PipelineError::NotFound {
            entity: "task",
            id: task_id,
        })?;
    if task.status.is_final() {
        return Err(PipelineError::Conflict(format!(
            "task {task_id} is already {}",
            task.status
        )));
    }

    tracing::info!(task_id, user_id, "Cancelling task");
    let (_, report) =
        force_finalize(ctx, task_id, CANCEL_MESSAGE, FinalizeTrigger::Cancelled).await?;
    report.ok_or_else(|| {
        PipelineError::Conflict(format!("task {task_id} was finalized concurrently"))
    })
}
