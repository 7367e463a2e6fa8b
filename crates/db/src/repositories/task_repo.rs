//! Repository for the `tasks` table.
//!
//! Status writes are conditional on the task still being non-final, so
//! concurrent finalizers serialize on the row lock and exactly one of them
//! sees its `UPDATE` match.

use fanout_core::types::{DbId, Timestamp};
use sqlx::types::Json;
use sqlx::PgConnection;

use crate::models::status::{StatusId, TaskStatus};
use crate::models::task::{NewTask, Task, TaskFinalization};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, user_id, prompt, model_configs, total_images, total_points, \
    status_id, progress, transaction_id, image_urls, zip_url, failed_reason, \
    refunded_points, refunded_at, created_at, updated_at, finished_at";

/// Statuses a task may still leave.
const OPEN_STATUSES: [StatusId; 2] = [
    TaskStatus::Pending as StatusId,
    TaskStatus::Processing as StatusId,
];

pub struct TaskRepo;

impl TaskRepo {
    pub async fn insert(
        conn: &mut PgConnection,
        input: &NewTask,
        transaction_id: DbId,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks \
                 (user_id, prompt, model_configs, total_images, total_points, status_id, transaction_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.user_id)
            .bind(&input.prompt)
            .bind(Json(&input.model_configs))
            .bind(input.total_images)
            .bind(input.total_points)
            .bind(TaskStatus::Pending.id())
            .bind(transaction_id)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Raise progress (never lower it) and optionally leave `pending`.
    ///
    /// Returns `None` when the task is missing or already final.
    pub async fn record_progress(
        conn: &mut PgConnection,
        id: DbId,
        progress: i16,
        mark_processing: bool,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET progress = GREATEST(progress, $2), \
                 status_id = CASE WHEN $3 AND status_id = $4 THEN $5 ELSE status_id END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(progress.clamp(0, 100))
            .bind(mark_processing)
            .bind(TaskStatus::Pending.id())
            .bind(TaskStatus::Processing.id())
            .bind(&OPEN_STATUSES[..])
            .fetch_optional(conn)
            .await
    }

    /// Write the terminal fields if the task is still open.
    ///
    /// `refunded_at` is stamped only when a refund is issued.
    pub async fn finalize(
        conn: &mut PgConnection,
        id: DbId,
        finalization: &TaskFinalization,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!(
            "UPDATE tasks \
             SET status_id = $2, progress = 100, image_urls = $3, failed_reason = $4, \
                 refunded_points = $5, \
                 refunded_at = CASE WHEN $5 > 0 THEN NOW() ELSE NULL END, \
                 finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = ANY($6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(finalization.status.id())
            .bind(&finalization.image_urls)
            .bind(&finalization.failed_reason)
            .bind(finalization.refund)
            .bind(&OPEN_STATUSES[..])
            .fetch_optional(conn)
            .await
    }

    /// Returns `true` if a row was updated.
    pub async fn set_zip_url(
        conn: &mut PgConnection,
        id: DbId,
        zip_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE tasks SET zip_url = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(zip_url)
                .execute(conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Open tasks created before `cutoff`, oldest first.
    pub async fn list_stale(
        conn: &mut PgConnection,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = ANY($1) AND created_at < $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(&OPEN_STATUSES[..])
            .bind(cutoff)
            .bind(limit)
            .fetch_all(conn)
            .await
    }
}
