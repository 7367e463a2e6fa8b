//! The persistence boundary used by the generation engine.
//!
//! Every method is one atomic unit: either the whole write lands or nothing
//! does. Status transitions are compare-and-swap operations that return
//! `Ok(None)` (or an empty list) when the precondition no longer holds, so
//! callers racing on the same row can tell who won without extra locking.

use async_trait::async_trait;
use fanout_core::types::{DbId, Points, Timestamp};

use crate::models::job::{Job, JobTransition, NewJob};
use crate::models::point_transaction::{LedgerEntry, PointTransaction};
use crate::models::task::{FinalizedTask, NewTask, Task, TaskFinalization};
use crate::models::user::{CreateUser, User};

/// Errors raised by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("user {0} not found")]
    UserNotFound(DbId),

    #[error("task {0} not found")]
    TaskNotFound(DbId),

    #[error("task {0} is already final")]
    TaskClosed(DbId),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Points, available: Points },

    #[error("invalid ledger amount {0}")]
    InvalidAmount(Points),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

#[async_trait]
pub trait Store: Send + Sync {
    // -- users and ledger --------------------------------------------------

    /// Create a user. A positive opening balance is written as a `bonus`.
    async fn create_user(&self, input: &CreateUser) -> DbResult<User>;

    async fn find_user(&self, id: DbId) -> DbResult<Option<User>>;

    /// Credit a user's balance and append the matching transaction row.
    async fn credit(&self, entry: &LedgerEntry) -> DbResult<PointTransaction>;

    /// Most recent transactions first.
    async fn list_transactions(&self, user_id: DbId, limit: i64)
        -> DbResult<Vec<PointTransaction>>;

    // -- task creation ----------------------------------------------------

    /// Re-read the balance, debit `total_points` as a `usage` transaction and
    /// insert the task referencing it. Nothing is written on failure.
    async fn create_task_with_debit(&self, input: &NewTask)
        -> DbResult<(Task, PointTransaction)>;

    /// Insert one `pending` job. Fails with [`DbError::TaskClosed`] once the
    /// task is final.
    async fn insert_job(&self, input: &NewJob) -> DbResult<Job>;

    // -- reads ------------------------------------------------------------

    async fn find_task(&self, id: DbId) -> DbResult<Option<Task>>;

    async fn find_job(&self, id: DbId) -> DbResult<Option<Job>>;

    /// All jobs of a task, oldest first.
    async fn list_jobs(&self, task_id: DbId) -> DbResult<Vec<Job>>;

    /// Non-final tasks created before `cutoff`, oldest first.
    async fn list_stale_tasks(&self, cutoff: Timestamp, limit: i64) -> DbResult<Vec<Task>>;

    /// `pending` jobs last touched before `cutoff` whose task is not final.
    async fn list_pending_jobs_before(&self, cutoff: Timestamp, limit: i64)
        -> DbResult<Vec<Job>>;

    // -- job transitions --------------------------------------------------

    /// `pending -> processing`. Sets `started_at`.
    async fn claim_job(&self, id: DbId) -> DbResult<Option<Job>>;

    /// `processing -> completed` with the uploaded image URLs.
    async fn complete_job(&self, id: DbId, image_urls: &[String]) -> DbResult<Option<Job>>;

    /// `processing -> pending` on the same row, recording the retry count and
    /// the error that caused it.
    async fn requeue_job(&self, id: DbId, retries: i32, error: &str) -> DbResult<Option<Job>>;

    /// `processing -> failed`.
    async fn fail_job(&self, id: DbId, error: &str) -> DbResult<Option<Job>>;

    /// Every `pending` or `processing` job of the task -> `failed`. Returns
    /// the rows that were changed.
    async fn force_fail_outstanding(&self, task_id: DbId, error: &str)
        -> DbResult<Vec<JobTransition>>;

    // -- task transitions -------------------------------------------------

    /// Store `progress` without ever lowering it, and move a `pending` task to
    /// `processing` when `mark_processing` is set. No-op on final tasks.
    async fn record_progress(
        &self,
        task_id: DbId,
        progress: i16,
        mark_processing: bool,
    ) -> DbResult<Option<Task>>;

    /// Finalize a non-final task: write the terminal fields, credit the refund
    /// and bump the user's statistics in one transaction. Returns `None` when
    /// the task was already final, in which case nothing is written.
    async fn finalize_task(
        &self,
        task_id: DbId,
        finalization: &TaskFinalization,
    ) -> DbResult<Option<FinalizedTask>>;

    /// Attach the archive URL to a final task.
    async fn set_zip_url(&self, task_id: DbId, zip_url: &str) -> DbResult<()>;
}
