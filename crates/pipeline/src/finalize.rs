//! Task finalization, shared by the aggregator, the reconciler and
//! cancellation.
//!
//! The store's compare-and-swap decides the single winner: it writes the
//! terminal fields, the refund and the user's statistics together. Losers
//! see `None` and do nothing else, so duplicate events and concurrent
//! sweeps never double-refund or double-notify.

use fanout_core::types::DbId;
use fanout_db::models::point_transaction::PointTransaction;
use fanout_db::models::task::Task;
use fanout_events::PipelineEvent;
use serde::Serialize;

use crate::aggregation::{plan_finalization, JobTally};
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::side_effects::{self, SideEffectOutcome};

/// Who asked for the finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeTrigger {
    /// The last outstanding job reached a terminal status.
    JobsSettled,
    /// The reconciler force-failed a task past its deadline.
    Timeout,
    /// The owner cancelled the task.
    Cancelled,
}

impl FinalizeTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::JobsSettled => "jobs_settled",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything the winning finalizer did.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizationReport {
    pub trigger: FinalizeTrigger,
    pub task: Task,
    pub refund_transaction: Option<PointTransaction>,
    pub email: SideEffectOutcome,
    pub gallery: SideEffectOutcome,
    pub archive: SideEffectOutcome,
}

/// Finalize `task_id` if all of its jobs are terminal.
///
/// For [`FinalizeTrigger::JobsSettled`] every paid-for image must also have
/// a job row; forced triggers accept missing rows and refund them.
/// Returns `None` when the task is not ready or another caller already
/// finalized it.
pub async fn try_finalize(
    ctx: &PipelineContext,
    task_id: DbId,
    trigger: FinalizeTrigger,
) -> Result<Option<FinalizationReport>, PipelineError> {
    let task = ctx
        .store
        .find_task(task_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "task",
            id: task_id,
        })?;
    if task.status.is_final() {
        return Ok(None);
    }

    let jobs = ctx.store.list_jobs(task_id).await?;
    let tally = JobTally::from_jobs(&jobs);
    let ready = match trigger {
        FinalizeTrigger::JobsSettled => tally.covers(task.total_images),
        FinalizeTrigger::Timeout | FinalizeTrigger::Cancelled => tally.is_settled(),
    };
    if !ready {
        return Ok(None);
    }

    let plan = plan_finalization(&task, &tally);
    let Some(finalized) = ctx.store.finalize_task(task_id, &plan).await? else {
        tracing::debug!(task_id, trigger = trigger.as_str(), "Task already finalized elsewhere");
        return Ok(None);
    };

    tracing::info!(
        task_id,
        user_id = finalized.task.user_id,
        trigger = trigger.as_str(),
        status = %finalized.task.status,
        completed = tally.completed,
        failed = tally.failed,
        refunded_points = finalized.task.refunded_points,
        "Task finalized",
    );
    ctx.bus.publish(PipelineEvent::TaskFinalized {
        task_id,
        status: finalized.task.status,
        refunded_points: finalized.task.refunded_points,
    });

    let (email, gallery, archive) = tokio::join!(
        side_effects::notify_owner(ctx, &finalized),
        side_effects::publish_gallery(ctx, &finalized),
        side_effects::package_archive(ctx, &finalized),
    );

    let mut task = finalized.task;
    if let SideEffectOutcome::Done { .. } = archive {
        if let Ok(Some(fresh)) = ctx.store.find_task(task_id).await {
            task = fresh;
        }
    }

    Ok(Some(FinalizationReport {
        trigger,
        task,
        refund_transaction: finalized.refund_transaction,
        email,
        gallery,
        archive,
    }))
}
