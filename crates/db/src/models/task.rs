//! Generation tasks: one prompt fanned out over many jobs.

use fanout_core::types::{DbId, Points, Timestamp};
use serde::{Deserialize, Serialize};
pub use sqlx::types::Json;
use sqlx::FromRow;

use super::point_transaction::PointTransaction;
use super::status::TaskStatus;
use super::user::User;

/// Priced model selection stored on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub requested_count: i32,
    pub points_per_unit: Points,
}

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub user_id: DbId,
    pub prompt: String,
    pub model_configs: Json<Vec<ModelConfig>>,
    pub total_images: i32,
    pub total_points: Points,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: TaskStatus,
    pub progress: i16,
    /// The `usage` transaction that paid for the task.
    pub transaction_id: Option<DbId>,
    pub image_urls: Vec<String>,
    pub zip_url: Option<String>,
    pub failed_reason: Option<String>,
    pub refunded_points: Points,
    pub refunded_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// Input for [`crate::Store::create_task_with_debit`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: DbId,
    pub prompt: String,
    pub model_configs: Vec<ModelConfig>,
    pub total_images: i32,
    pub total_points: Points,
    /// Description written on the `usage` transaction.
    pub debit_description: String,
}

/// Terminal fields written by the finalization compare-and-swap.
#[derive(Debug, Clone)]
pub struct TaskFinalization {
    /// `Completed` or `Failed`.
    pub status: TaskStatus,
    pub image_urls: Vec<String>,
    pub failed_reason: Option<String>,
    /// Zero means no ledger credit.
    pub refund: Points,
    pub refund_description: String,
    /// Added to the user's `total_images`.
    pub completed_images: i64,
}

/// Result of a finalization that won the compare-and-swap.
#[derive(Debug, Clone)]
pub struct FinalizedTask {
    pub task: Task,
    pub user: User,
    pub refund_transaction: Option<PointTransaction>,
}
