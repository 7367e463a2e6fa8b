//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for every transition; each
//! transition is an `UPDATE ... WHERE status_id = <expected>` so a stale
//! caller matches no row and gets `None`.

use fanout_core::types::{DbId, Timestamp};
use sqlx::PgConnection;

use crate::models::job::{Job, NewJob};
use crate::models::status::{JobStatus, StatusId, TaskStatus};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, task_id, user_id, prompt, model_id, status_id, retries, points_cost, \
    image_url, image_urls, error_message, created_at, updated_at, started_at, finished_at";

/// Task statuses whose jobs may still be redelivered.
const OPEN_TASK_STATUSES: [StatusId; 2] = [
    TaskStatus::Pending as StatusId,
    TaskStatus::Processing as StatusId,
];

/// Statuses that still count as outstanding work.
const OUTSTANDING_STATUSES: [StatusId; 2] = [
    JobStatus::Pending as StatusId,
    JobStatus::Processing as StatusId,
];

pub struct JobRepo;

impl JobRepo {
    /// Insert a `pending` job while its task is still open. The task row is
    /// share-locked so a concurrent finalization either waits for the insert
    /// or makes it return `None`.
    pub async fn insert(
        conn: &mut PgConnection,
        input: &NewJob,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (task_id, user_id, prompt, model_id, status_id, points_cost) \
             SELECT t.id, $2, $3, $4, $5, $6 FROM tasks t \
             WHERE t.id = $1 AND t.status_id IN ($7, $8) \
             FOR SHARE \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.task_id)
            .bind(input.user_id)
            .bind(&input.prompt)
            .bind(&input.model_id)
            .bind(JobStatus::Pending.id())
            .bind(input.points_cost)
            .bind(TaskStatus::Pending.id())
            .bind(TaskStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn list_for_task(
        conn: &mut PgConnection,
        task_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE task_id = $1 ORDER BY id ASC");
        sqlx::query_as::<_, Job>(&query)
            .bind(task_id)
            .fetch_all(conn)
            .await
    }

    /// `pending -> processing`.
    pub async fn claim(conn: &mut PgConnection, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Processing.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(conn)
            .await
    }

    /// `processing -> completed`.
    pub async fn complete(
        conn: &mut PgConnection,
        id: DbId,
        image_urls: &[String],
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, image_url = $3, image_urls = $4, error_message = NULL, \
                 finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $5 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Completed.id())
            .bind(image_urls.first())
            .bind(image_urls)
            .bind(JobStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    /// `processing -> pending`, same row, new retry count.
    pub async fn requeue(
        conn: &mut PgConnection,
        id: DbId,
        retries: i32,
        error: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, retries = $3, error_message = $4, updated_at = NOW() \
             WHERE id = $1 AND status_id = $5 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Pending.id())
            .bind(retries)
            .bind(error)
            .bind(JobStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    /// `processing -> failed`.
    pub async fn fail(
        conn: &mut PgConnection,
        id: DbId,
        error: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .bind(JobStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    /// Lock the task's outstanding jobs and return `(id, status_id)` pairs.
    pub async fn lock_outstanding(
        conn: &mut PgConnection,
        task_id: DbId,
    ) -> Result<Vec<(DbId, StatusId)>, sqlx::Error> {
        sqlx::query_as::<_, (DbId, StatusId)>(
            "SELECT id, status_id FROM jobs \
             WHERE task_id = $1 AND status_id = ANY($2) \
             ORDER BY id ASC \
             FOR UPDATE",
        )
        .bind(task_id)
        .bind(&OUTSTANDING_STATUSES[..])
        .fetch_all(conn)
        .await
    }

    /// Fail the given jobs. Call after [`Self::lock_outstanding`].
    pub async fn fail_many(
        conn: &mut PgConnection,
        ids: &[DbId],
        error: &str,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, finished_at = NOW(), updated_at = NOW() \
             WHERE id = ANY($1) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(ids)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .fetch_all(conn)
            .await
    }

    /// `pending` jobs untouched since `cutoff` whose task is still open.
    pub async fn list_pending_before(
        conn: &mut PgConnection,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 AND updated_at < $2 \
               AND task_id IN (SELECT id FROM tasks WHERE status_id = ANY($3)) \
             ORDER BY updated_at ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(cutoff)
            .bind(&OPEN_TASK_STATUSES[..])
            .bind(limit)
            .fetch_all(conn)
            .await
    }
}
