//! Task creation: validate, price, debit, fan out.

use std::collections::BTreeMap;

use fanout_core::generation::{estimate_time_secs, normalize_selection, validate_prompt};
use fanout_core::types::{DbId, Points};
use fanout_db::models::job::NewJob;
use fanout_db::models::task::{ModelConfig, NewTask};
use fanout_db::DbError;
use fanout_events::PipelineEvent;
use serde::{Deserialize, Serialize};

use crate::context::PipelineContext;
use crate::error::PipelineError;

/// A generation request as submitted by a user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: DbId,
    pub prompt: String,
    /// `model_id -> image count`. Zero counts are ignored.
    pub selected_models: BTreeMap<String, u32>,
}

/// What the caller learns about a freshly created task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReceipt {
    pub task_id: DbId,
    pub total_images: u32,
    pub total_points: Points,
    pub estimated_time_secs: u64,
    pub new_balance: Points,
    /// Jobs actually written; lower than `total_images` after a partial fan-out.
    pub jobs_created: u32,
}

/// Validate and price `request`, debit the user and persist the task with
/// one pending job per requested image.
///
/// The debit and the task row are one atomic write: on failure no points
/// move and no rows exist. Job rows are written afterwards; if that stops
/// part way, the jobs already written proceed and finalization refunds the
/// ones that never existed.
pub async fn create_task(
    ctx: &PipelineContext,
    request: CreateTaskRequest,
) -> Result<TaskReceipt, PipelineError> {
    let prompt = validate_prompt(&request.prompt)?;
    let selection = normalize_selection(&request.selected_models)?;
    let quote = ctx.rates.quote(&selection);

    for line in quote.lines.iter().filter(|l| l.is_fallback) {
        tracing::warn!(
            model_id = %line.model_id,
            points_per_unit = line.points_per_unit,
            "Unknown model, charging fallback rate",
        );
    }

    let model_configs: Vec<ModelConfig> = quote
        .lines
        .iter()
        .map(|l| ModelConfig {
            model_id: l.model_id.clone(),
            requested_count: l.requested_count as i32,
            points_per_unit: l.points_per_unit,
        })
        .collect();

    let (task, debit) = ctx
        .store
        .create_task_with_debit(&NewTask {
            user_id: request.user_id,
            prompt: prompt.clone(),
            model_configs: model_configs.clone(),
            total_images: quote.total_images as i32,
            total_points: quote.total_points,
            debit_description: format!("Image generation: {} images", quote.total_images),
        })
        .await?;

    tracing::info!(
        task_id = task.id,
        user_id = task.user_id,
        total_images = quote.total_images,
        total_points = quote.total_points,
        new_balance = debit.balance_after,
        "Task created",
    );

    let jobs_created = fan_out(ctx, task.id, request.user_id, &prompt, &model_configs).await;
    if jobs_created < quote.total_images {
        tracing::error!(
            task_id = task.id,
            jobs_created,
            total_images = quote.total_images,
            "Partial job fan-out; missing jobs will be refunded at finalization",
        );
    }

    Ok(TaskReceipt {
        task_id: task.id,
        total_images: quote.total_images,
        total_points: quote.total_points,
        estimated_time_secs: estimate_time_secs(quote.total_images, ctx.config.per_image_seconds),
        new_balance: debit.balance_after,
        jobs_created,
    })
}

/// Insert one job per image and announce each. Stops at the first failed
/// insert and returns how many jobs exist.
async fn fan_out(
    ctx: &PipelineContext,
    task_id: DbId,
    user_id: DbId,
    prompt: &str,
    model_configs: &[ModelConfig],
) -> u32 {
    let mut created = 0u32;
    for config in model_configs {
        for _ in 0..config.requested_count {
            let inserted = ctx
                .store
                .insert_job(&NewJob {
                    task_id,
                    user_id,
                    prompt: prompt.to_string(),
                    model_id: config.model_id.clone(),
                    points_cost: config.points_per_unit,
                })
                .await;
            match inserted {
                Ok(job) => {
                    created += 1;
                    ctx.bus.publish(PipelineEvent::JobCreated {
                        task_id,
                        job_id: job.id,
                    });
                }
                Err(DbError::TaskClosed(_)) => {
                    tracing::info!(task_id, created, "Task closed during fan-out, stopping");
                    return created;
                }
                Err(e) => {
                    tracing::error!(task_id, error = %e, "Failed to insert job");
                    return created;
                }
            }
        }
    }
    created
}
