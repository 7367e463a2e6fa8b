//! Handlers for the `/tasks` resource.
//!
//! There is no authentication layer; the owning user is named in the
//! request body where ownership matters.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use fanout_core::types::DbId;
use fanout_db::models::task::Task;
use fanout_pipeline::{cancel, CreateTaskRequest, PipelineError};
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

async fn find_task(state: &AppState, task_id: DbId) -> AppResult<Task> {
    let task = state
        .pipeline
        .store
        .find_task(task_id)
        .await
        .map_err(PipelineError::from)?
        .ok_or(PipelineError::NotFound {
            entity: "task",
            id: task_id,
        })?;
    Ok(task)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Debit the user and fan the request out into jobs. Returns 201 with the
/// receipt; generation continues in the background.
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<CreateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let receipt = fanout_pipeline::create_task(&state.pipeline, input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let task = find_task(&state, task_id).await?;
    Ok(Json(DataResponse { data: task }))
}

/// GET /api/v1/tasks/{id}/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_task(&state, task_id).await?;
    let jobs = state
        .pipeline
        .store
        .list_jobs(task_id)
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CancelTaskRequest {
    pub user_id: DbId,
}

/// POST /api/v1/tasks/{id}/cancel
///
/// Fail every outstanding job and finalize now. 409 if the task is
/// already finalized.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<DbId>,
    Json(input): Json<CancelTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let report = cancel::cancel_task(&state.pipeline, task_id, input.user_id).await?;
    Ok(Json(DataResponse { data: report }))
}
