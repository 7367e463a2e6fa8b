//! [`Store`] backed by PostgreSQL.
//!
//! Multi-row operations run in one transaction; row locks (`FOR UPDATE`)
//! and conditional `UPDATE`s carry the preconditions.

use async_trait::async_trait;
use fanout_core::types::{DbId, Points, Timestamp};
use sqlx::PgConnection;

use crate::models::job::{Job, JobTransition, NewJob};
use crate::models::point_transaction::{LedgerEntry, PointTransaction};
use crate::models::status::{JobStatus, TransactionType};
use crate::models::task::{FinalizedTask, NewTask, Task, TaskFinalization};
use crate::models::user::{CreateUser, User};
use crate::repositories::{JobRepo, PointTransactionRepo, TaskRepo, UserRepo};
use crate::store::{DbError, DbResult, Store};
use crate::DbPool;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Lock the user row, move `amount` through the balance and append the
/// ledger row. Must run inside a transaction.
async fn apply_ledger(
    conn: &mut PgConnection,
    user_id: DbId,
    amount: Points,
    tx_type: TransactionType,
    description: &str,
    related_task_id: Option<DbId>,
) -> DbResult<PointTransaction> {
    let user = UserRepo::find_for_update(&mut *conn, user_id)
        .await?
        .ok_or(DbError::UserNotFound(user_id))?;

    let balance_after = user.points + amount;
    if balance_after < 0 {
        return Err(DbError::InsufficientBalance {
            required: -amount,
            available: user.points,
        });
    }

    let row = PointTransactionRepo::append(
        &mut *conn,
        user_id,
        amount,
        tx_type,
        user.points,
        description,
        related_task_id,
    )
    .await?;
    UserRepo::set_points(&mut *conn, user_id, balance_after).await?;
    Ok(row)
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, input: &CreateUser) -> DbResult<User> {
        if input.initial_points < 0 {
            return Err(DbError::InvalidAmount(input.initial_points));
        }
        let mut tx = self.pool.begin().await?;
        let user = UserRepo::insert(&mut tx, input).await?;
        if input.initial_points > 0 {
            apply_ledger(
                &mut tx,
                user.id,
                input.initial_points,
                TransactionType::Bonus,
                "Opening balance",
                None,
            )
            .await?;
        }
        let user = UserRepo::find_by_id(&mut tx, user.id)
            .await?
            .ok_or(DbError::UserNotFound(user.id))?;
        tx.commit().await?;
        Ok(user)
    }

    async fn find_user(&self, id: DbId) -> DbResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        Ok(UserRepo::find_by_id(&mut conn, id).await?)
    }

    async fn credit(&self, entry: &LedgerEntry) -> DbResult<PointTransaction> {
        if entry.amount <= 0 {
            return Err(DbError::InvalidAmount(entry.amount));
        }
        let mut tx = self.pool.begin().await?;
        let row = apply_ledger(
            &mut tx,
            entry.user_id,
            entry.amount,
            entry.tx_type,
            &entry.description,
            entry.related_task_id,
        )
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> DbResult<Vec<PointTransaction>> {
        let mut conn = self.pool.acquire().await?;
        Ok(PointTransactionRepo::list_for_user(&mut conn, user_id, limit).await?)
    }

    async fn create_task_with_debit(
        &self,
        input: &NewTask,
    ) -> DbResult<(Task, PointTransaction)> {
        if input.total_points <= 0 {
            return Err(DbError::InvalidAmount(input.total_points));
        }
        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;
        let debit = apply_ledger(
            &mut tx,
            input.user_id,
            -input.total_points,
            TransactionType::Usage,
            &input.debit_description,
            None,
        )
        .await?;
        let task = TaskRepo::insert(&mut tx, input, debit.id).await?;
        let debit = PointTransactionRepo::link_task(&mut tx, debit.id, task.id).await?;
        tx.commit().await?;
        Ok((task, debit))
    }

    async fn insert_job(&self, input: &NewJob) -> DbResult<Job> {
        let mut conn = self.pool.acquire().await?;
        if let Some(job) = JobRepo::insert(&mut conn, input).await? {
            return Ok(job);
        }
        match TaskRepo::find_by_id(&mut conn, input.task_id).await? {
            Some(_) => Err(DbError::TaskClosed(input.task_id)),
            None => Err(DbError::TaskNotFound(input.task_id)),
        }
    }

    async fn find_task(&self, id: DbId) -> DbResult<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        Ok(TaskRepo::find_by_id(&mut conn, id).await?)
    }

    async fn find_job(&self, id: DbId) -> DbResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::find_by_id(&mut conn, id).await?)
    }

    async fn list_jobs(&self, task_id: DbId) -> DbResult<Vec<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::list_for_task(&mut conn, task_id).await?)
    }

    async fn list_stale_tasks(&self, cutoff: Timestamp, limit: i64) -> DbResult<Vec<Task>> {
        let mut conn = self.pool.acquire().await?;
        Ok(TaskRepo::list_stale(&mut conn, cutoff, limit).await?)
    }

    async fn list_pending_jobs_before(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> DbResult<Vec<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::list_pending_before(&mut conn, cutoff, limit).await?)
    }

    async fn claim_job(&self, id: DbId) -> DbResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::claim(&mut conn, id).await?)
    }

    async fn complete_job(&self, id: DbId, image_urls: &[String]) -> DbResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::complete(&mut conn, id, image_urls).await?)
    }

    async fn requeue_job(&self, id: DbId, retries: i32, error: &str) -> DbResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::requeue(&mut conn, id, retries, error).await?)
    }

    async fn fail_job(&self, id: DbId, error: &str) -> DbResult<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        Ok(JobRepo::fail(&mut conn, id, error).await?)
    }

    async fn force_fail_outstanding(
        &self,
        task_id: DbId,
        error: &str,
    ) -> DbResult<Vec<JobTransition>> {
        let mut tx = self.pool.begin().await?;
        let locked = JobRepo::lock_outstanding(&mut tx, task_id).await?;
        if locked.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DbId> = locked.iter().map(|(id, _)| *id).collect();
        let failed = JobRepo::fail_many(&mut tx, &ids, error).await?;
        tx.commit().await?;

        Ok(failed
            .into_iter()
            .filter_map(|job| {
                let (_, status_id) = locked.iter().find(|(id, _)| *id == job.id)?;
                let previous = JobStatus::try_from(*status_id).ok()?;
                Some(JobTransition { previous, job })
            })
            .collect())
    }

    async fn record_progress(
        &self,
        task_id: DbId,
        progress: i16,
        mark_processing: bool,
    ) -> DbResult<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        let updated = TaskRepo::record_progress(&mut conn, task_id, progress, mark_processing).await?;
        if updated.is_none() && TaskRepo::find_by_id(&mut conn, task_id).await?.is_none() {
            return Err(DbError::TaskNotFound(task_id));
        }
        Ok(updated)
    }

    async fn finalize_task(
        &self,
        task_id: DbId,
        finalization: &TaskFinalization,
    ) -> DbResult<Option<FinalizedTask>> {
        let mut tx = self.pool.begin().await?;
        let Some(task) = TaskRepo::finalize(&mut tx, task_id, finalization).await? else {
            if TaskRepo::find_by_id(&mut tx, task_id).await?.is_none() {
                return Err(DbError::TaskNotFound(task_id));
            }
            return Ok(None);
        };

        let refund_transaction = if finalization.refund > 0 {
            Some(
                apply_ledger(
                    &mut tx,
                    task.user_id,
                    finalization.refund,
                    TransactionType::Refund,
                    &finalization.refund_description,
                    Some(task_id),
                )
                .await?,
            )
        } else {
            None
        };
        let user = UserRepo::bump_stats(&mut tx, task.user_id, finalization.completed_images).await?;
        tx.commit().await?;

        Ok(Some(FinalizedTask {
            task,
            user,
            refund_transaction,
        }))
    }

    async fn set_zip_url(&self, task_id: DbId, zip_url: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        if !TaskRepo::set_zip_url(&mut conn, task_id, zip_url).await? {
            return Err(DbError::TaskNotFound(task_id));
        }
        Ok(())
    }
}
