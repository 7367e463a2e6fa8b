//! In-process [`Store`] used by tests and by binaries started without
//! `DATABASE_URL`.
//!
//! All state sits behind one mutex and every trait method holds it for its
//! whole body, so each call behaves like a serializable transaction.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use fanout_core::types::{DbId, Points, Timestamp};
use sqlx::types::Json;

use crate::models::job::{Job, JobTransition, NewJob};
use crate::models::point_transaction::{LedgerEntry, PointTransaction};
use crate::models::status::{JobStatus, TaskStatus, TransactionType};
use crate::models::task::{FinalizedTask, NewTask, Task, TaskFinalization};
use crate::models::user::{CreateUser, User};
use crate::store::{DbError, DbResult, Store};

#[derive(Default)]
struct State {
    next_user_id: DbId,
    next_transaction_id: DbId,
    next_task_id: DbId,
    next_job_id: DbId,
    users: BTreeMap<DbId, User>,
    transactions: Vec<PointTransaction>,
    tasks: BTreeMap<DbId, Task>,
    jobs: BTreeMap<DbId, Job>,
}

impl State {
    /// Move `amount` (signed) through the user's balance and append the row.
    fn apply_ledger(
        &mut self,
        user_id: DbId,
        amount: Points,
        tx_type: TransactionType,
        description: &str,
        related_task_id: Option<DbId>,
    ) -> DbResult<PointTransaction> {
        let now = Utc::now();
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or(DbError::UserNotFound(user_id))?;

        let balance_before = user.points;
        let balance_after = balance_before + amount;
        if balance_after < 0 {
            return Err(DbError::InsufficientBalance {
                required: -amount,
                available: balance_before,
            });
        }
        user.points = balance_after;
        user.updated_at = now;

        self.next_transaction_id += 1;
        let row = PointTransaction {
            id: self.next_transaction_id,
            user_id,
            amount,
            tx_type,
            balance_before,
            balance_after,
            description: description.to_string(),
            related_task_id,
            created_at: now,
        };
        self.transactions.push(row.clone());
        Ok(row)
    }

    /// Apply `f` to a job currently in `from`, returning the updated row.
    fn transition_job(
        &mut self,
        id: DbId,
        from: JobStatus,
        f: impl FnOnce(&mut Job, Timestamp),
    ) -> Option<Job> {
        let job = self.jobs.get_mut(&id).filter(|j| j.status == from)?;
        let now = Utc::now();
        f(job, now);
        job.updated_at = now;
        Some(job.clone())
    }
}

/// Mutex-guarded maps implementing [`Store`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shift a task's `created_at` and its jobs' timestamps into the past.
    ///
    /// Lets callers exercise deadline-driven paths without waiting.
    pub fn backdate_task(&self, task_id: DbId, by: chrono::Duration) {
        let mut state = self.lock();
        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.created_at -= by;
            task.updated_at -= by;
        }
        for job in state.jobs.values_mut().filter(|j| j.task_id == task_id) {
            job.created_at -= by;
            job.updated_at -= by;
        }
    }

    /// Every ledger row of a user, oldest first.
    pub fn ledger_for(&self, user_id: DbId) -> Vec<PointTransaction> {
        self.lock()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_user(&self, input: &CreateUser) -> DbResult<User> {
        if input.initial_points < 0 {
            return Err(DbError::InvalidAmount(input.initial_points));
        }
        let mut state = self.lock();
        let now = Utc::now();
        state.next_user_id += 1;
        let id = state.next_user_id;
        state.users.insert(
            id,
            User {
                id,
                email: input.email.clone(),
                display_name: input.display_name.clone(),
                points: 0,
                total_generations: 0,
                total_images: 0,
                created_at: now,
                updated_at: now,
            },
        );
        if input.initial_points > 0 {
            state.apply_ledger(
                id,
                input.initial_points,
                TransactionType::Bonus,
                "Opening balance",
                None,
            )?;
        }
        Ok(state.users[&id].clone())
    }

    async fn find_user(&self, id: DbId) -> DbResult<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn credit(&self, entry: &LedgerEntry) -> DbResult<PointTransaction> {
        if entry.amount <= 0 {
            return Err(DbError::InvalidAmount(entry.amount));
        }
        self.lock().apply_ledger(
            entry.user_id,
            entry.amount,
            entry.tx_type,
            &entry.description,
            entry.related_task_id,
        )
    }

    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> DbResult<Vec<PointTransaction>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_task_with_debit(
        &self,
        input: &NewTask,
    ) -> DbResult<(Task, PointTransaction)> {
        if input.total_points <= 0 {
            return Err(DbError::InvalidAmount(input.total_points));
        }
        let mut state = self.lock();
        let mut debit = state.apply_ledger(
            input.user_id,
            -input.total_points,
            TransactionType::Usage,
            &input.debit_description,
            None,
        )?;

        let now = Utc::now();
        state.next_task_id += 1;
        let task = Task {
            id: state.next_task_id,
            user_id: input.user_id,
            prompt: input.prompt.clone(),
            model_configs: Json(input.model_configs.clone()),
            total_images: input.total_images,
            total_points: input.total_points,
            status: TaskStatus::Pending,
            progress: 0,
            transaction_id: Some(debit.id),
            image_urls: Vec::new(),
            zip_url: None,
            failed_reason: None,
            refunded_points: 0,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        state.tasks.insert(task.id, task.clone());

        debit.related_task_id = Some(task.id);
        if let Some(row) = state.transactions.iter_mut().find(|t| t.id == debit.id) {
            row.related_task_id = Some(task.id);
        }
        Ok((task, debit))
    }

    async fn insert_job(&self, input: &NewJob) -> DbResult<Job> {
        let mut state = self.lock();
        match state.tasks.get(&input.task_id) {
            None => return Err(DbError::TaskNotFound(input.task_id)),
            Some(task) if task.status.is_final() => {
                return Err(DbError::TaskClosed(input.task_id))
            }
            Some(_) => {}
        }
        let now = Utc::now();
        state.next_job_id += 1;
        let job = Job {
            id: state.next_job_id,
            task_id: input.task_id,
            user_id: input.user_id,
            prompt: input.prompt.clone(),
            model_id: input.model_id.clone(),
            status: JobStatus::Pending,
            retries: 0,
            points_cost: input.points_cost,
            image_url: None,
            image_urls: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_task(&self, id: DbId) -> DbResult<Option<Task>> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn find_job(&self, id: DbId) -> DbResult<Option<Job>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, task_id: DbId) -> DbResult<Vec<Job>> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|j| j.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_stale_tasks(&self, cutoff: Timestamp, limit: i64) -> DbResult<Vec<Task>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut stale: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| !t.status.is_final() && t.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.created_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list_pending_jobs_before(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> DbResult<Vec<Job>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let state = self.lock();
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.updated_at < cutoff)
            .filter(|j| {
                state
                    .tasks
                    .get(&j.task_id)
                    .is_some_and(|t| !t.status.is_final())
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_job(&self, id: DbId) -> DbResult<Option<Job>> {
        Ok(self
            .lock()
            .transition_job(id, JobStatus::Pending, |job, now| {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
            }))
    }

    async fn complete_job(&self, id: DbId, image_urls: &[String]) -> DbResult<Option<Job>> {
        Ok(self
            .lock()
            .transition_job(id, JobStatus::Processing, |job, now| {
                job.status = JobStatus::Completed;
                job.image_url = image_urls.first().cloned();
                job.image_urls = image_urls.to_vec();
                job.error_message = None;
                job.finished_at = Some(now);
            }))
    }

    async fn requeue_job(&self, id: DbId, retries: i32, error: &str) -> DbResult<Option<Job>> {
        Ok(self
            .lock()
            .transition_job(id, JobStatus::Processing, |job, _| {
                job.status = JobStatus::Pending;
                job.retries = retries;
                job.error_message = Some(error.to_string());
            }))
    }

    async fn fail_job(&self, id: DbId, error: &str) -> DbResult<Option<Job>> {
        Ok(self
            .lock()
            .transition_job(id, JobStatus::Processing, |job, now| {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.finished_at = Some(now);
            }))
    }

    async fn force_fail_outstanding(
        &self,
        task_id: DbId,
        error: &str,
    ) -> DbResult<Vec<JobTransition>> {
        let mut state = self.lock();
        let now = Utc::now();
        let changed = state
            .jobs
            .values_mut()
            .filter(|j| j.task_id == task_id && j.status.is_outstanding())
            .map(|job| {
                let previous = job.status;
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.finished_at = Some(now);
                job.updated_at = now;
                JobTransition {
                    previous,
                    job: job.clone(),
                }
            })
            .collect();
        Ok(changed)
    }

    async fn record_progress(
        &self,
        task_id: DbId,
        progress: i16,
        mark_processing: bool,
    ) -> DbResult<Option<Task>> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(DbError::TaskNotFound(task_id))?;
        if task.status.is_final() {
            return Ok(None);
        }
        task.progress = task.progress.max(progress.clamp(0, 100));
        if mark_processing && task.status == TaskStatus::Pending {
            task.status = TaskStatus::Processing;
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn finalize_task(
        &self,
        task_id: DbId,
        finalization: &TaskFinalization,
    ) -> DbResult<Option<FinalizedTask>> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get(&task_id)
            .ok_or(DbError::TaskNotFound(task_id))?;
        if task.status.is_final() {
            return Ok(None);
        }
        let user_id = task.user_id;
        if !state.users.contains_key(&user_id) {
            return Err(DbError::UserNotFound(user_id));
        }

        let refund_transaction = if finalization.refund > 0 {
            Some(state.apply_ledger(
                user_id,
                finalization.refund,
                TransactionType::Refund,
                &finalization.refund_description,
                Some(task_id),
            )?)
        } else {
            None
        };

        let now = Utc::now();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(DbError::UserNotFound(user_id))?;
        user.total_generations += 1;
        user.total_images += finalization.completed_images;
        user.updated_at = now;
        let user = user.clone();

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(DbError::TaskNotFound(task_id))?;
        task.status = finalization.status;
        task.progress = 100;
        task.image_urls = finalization.image_urls.clone();
        task.failed_reason = finalization.failed_reason.clone();
        task.refunded_points = finalization.refund;
        task.refunded_at = refund_transaction.as_ref().map(|_| now);
        task.finished_at = Some(now);
        task.updated_at = now;

        Ok(Some(FinalizedTask {
            task: task.clone(),
            user,
            refund_transaction,
        }))
    }

    async fn set_zip_url(&self, task_id: DbId, zip_url: &str) -> DbResult<()> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(DbError::TaskNotFound(task_id))?;
        task.zip_url = Some(zip_url.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::models::task::ModelConfig;

    async fn user_with(store: &InMemoryStore, points: Points) -> User {
        store
            .create_user(&CreateUser {
                email: "ada@example.com".into(),
                display_name: Some("Ada".into()),
                initial_points: points,
            })
            .await
            .unwrap()
    }

    fn new_task(user_id: DbId, total_points: Points) -> NewTask {
        NewTask {
            user_id,
            prompt: "a lighthouse at dusk".into(),
            model_configs: vec![ModelConfig {
                model_id: "flux-dev".into(),
                requested_count: 2,
                points_per_unit: total_points / 2,
            }],
            total_images: 2,
            total_points,
            debit_description: "Image generation".into(),
        }
    }

    fn finalization(refund: Points) -> TaskFinalization {
        TaskFinalization {
            status: TaskStatus::Completed,
            image_urls: vec!["https://cdn.test/a.png".into()],
            failed_reason: None,
            refund,
            refund_description: "Partial refund".into(),
            completed_images: 1,
        }
    }

    #[tokio::test]
    async fn debit_rejects_overdraft_without_writing() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 5).await;

        let err = store
            .create_task_with_debit(&new_task(user.id, 30))
            .await
            .unwrap_err();

        assert_matches!(
            err,
            DbError::InsufficientBalance {
                required: 30,
                available: 5
            }
        );
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().points, 5);
        assert!(store.list_stale_tasks(Utc::now(), 10).await.unwrap().is_empty());
        assert_eq!(store.ledger_for(user.id).len(), 1);
    }

    #[tokio::test]
    async fn debit_links_transaction_and_task() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 100).await;

        let (task, debit) = store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();

        assert_eq!(task.transaction_id, Some(debit.id));
        assert_eq!(debit.related_task_id, Some(task.id));
        assert_eq!(debit.amount, -20);
        assert_eq!((debit.balance_before, debit.balance_after), (100, 80));
        let ledger = store.ledger_for(user.id);
        assert_eq!(ledger[1].related_task_id, Some(task.id));
    }

    #[tokio::test]
    async fn ledger_rows_chain_balances() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 50).await;
        store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();
        store
            .credit(&LedgerEntry {
                user_id: user.id,
                amount: 7,
                tx_type: TransactionType::Purchase,
                description: "Top-up".into(),
                related_task_id: None,
            })
            .await
            .unwrap();

        let ledger = store.ledger_for(user.id);
        for pair in ledger.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
        for row in &ledger {
            assert_eq!(row.balance_after, row.balance_before + row.amount);
        }
        assert_eq!(ledger.last().unwrap().balance_after, 37);
    }

    #[tokio::test]
    async fn credit_rejects_non_positive_amounts() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 0).await;
        let err = store
            .credit(&LedgerEntry {
                user_id: user.id,
                amount: 0,
                tx_type: TransactionType::Bonus,
                description: "nothing".into(),
                related_task_id: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, DbError::InvalidAmount(0));
    }

    #[tokio::test]
    async fn claim_is_a_compare_and_swap() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 100).await;
        let (task, _) = store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();
        let job = store
            .insert_job(&NewJob {
                task_id: task.id,
                user_id: user.id,
                prompt: task.prompt.clone(),
                model_id: "flux-dev".into(),
                points_cost: 10,
            })
            .await
            .unwrap();

        assert!(store.claim_job(job.id).await.unwrap().is_some());
        assert!(store.claim_job(job.id).await.unwrap().is_none());
        // Completing from `pending` is refused as well.
        assert!(store.requeue_job(job.id, 1, "boom").await.unwrap().is_some());
        assert!(store.complete_job(job.id, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_runs_once() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 100).await;
        let (task, _) = store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();

        let first = store
            .finalize_task(task.id, &finalization(10))
            .await
            .unwrap()
            .expect("first finalization wins");
        let second = store.finalize_task(task.id, &finalization(10)).await.unwrap();

        assert!(second.is_none());
        assert_eq!(first.task.status, TaskStatus::Completed);
        assert_eq!(first.task.refunded_points, 10);
        assert!(first.task.refunded_at.is_some());
        assert_eq!(first.user.points, 90);
        assert_eq!(first.user.total_generations, 1);
        assert_eq!(first.user.total_images, 1);
        let refunds = store
            .ledger_for(user.id)
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[tokio::test]
    async fn insert_job_refuses_final_task() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 100).await;
        let (task, _) = store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();
        let job = NewJob {
            task_id: task.id,
            user_id: user.id,
            prompt: task.prompt.clone(),
            model_id: "flux-dev".into(),
            points_cost: 10,
        };
        store.insert_job(&job).await.unwrap();

        store.finalize_task(task.id, &finalization(10)).await.unwrap();

        let err = store.insert_job(&job).await.unwrap_err();
        assert_matches!(err, DbError::TaskClosed(id) if id == task.id);
        assert_eq!(store.list_jobs(task.id).await.unwrap().len(), 1);

        let missing = NewJob { task_id: 999, ..job };
        assert_matches!(
            store.insert_job(&missing).await.unwrap_err(),
            DbError::TaskNotFound(999)
        );
    }

    #[tokio::test]
    async fn progress_never_decreases_and_stops_at_finalization() {
        let store = InMemoryStore::new();
        let user = user_with(&store, 100).await;
        let (task, _) = store
            .create_task_with_debit(&new_task(user.id, 20))
            .await
            .unwrap();

        let t = store.record_progress(task.id, 50, true).await.unwrap().unwrap();
        assert_eq!((t.progress, t.status), (50, TaskStatus::Processing));
        let t = store.record_progress(task.id, 20, false).await.unwrap().unwrap();
        assert_eq!(t.progress, 50);

        store.finalize_task(task.id, &finalization(0)).await.unwrap();
        assert!(store.record_progress(task.id, 10, true).await.unwrap().is_none());
        let t = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(t.progress, 100);
        assert!(t.refunded_at.is_none());
    }
}
