//! Jobs: one image generation each, children of a task.

use fanout_core::types::{DbId, Points, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use super::status::JobStatus;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub task_id: DbId,
    pub user_id: DbId,
    pub prompt: String,
    pub model_id: String,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    pub retries: i32,
    /// Fixed at creation.
    pub points_cost: Points,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// Input for [`crate::Store::insert_job`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task_id: DbId,
    pub user_id: DbId,
    pub prompt: String,
    pub model_id: String,
    pub points_cost: Points,
}

/// A job row together with the status it had before a bulk transition.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub previous: JobStatus,
    pub job: Job,
}
