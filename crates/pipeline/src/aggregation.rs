//! Pure tally and outcome rules for a task's jobs.
//!
//! Nothing here touches the store; the aggregator and the reconciler feed
//! it the current job rows and act on the result.

use fanout_core::types::Points;
use fanout_db::models::job::Job;
use fanout_db::models::status::{JobStatus, TaskStatus};
use fanout_db::models::task::{Task, TaskFinalization};

/// Counts over a task's job rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTally {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Abandoned rows; excluded from the denominator and from every sum.
    pub requeued: usize,
    pub completed_points: Points,
    pub failed_points: Points,
    /// Image URLs of completed jobs, in job order.
    pub image_urls: Vec<String>,
}

impl JobTally {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut tally = Self {
            total: jobs.len(),
            ..Self::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => tally.pending += 1,
                JobStatus::Processing => tally.processing += 1,
                JobStatus::Requeued => tally.requeued += 1,
                JobStatus::Completed => {
                    tally.completed += 1;
                    tally.completed_points += job.points_cost;
                    tally.image_urls.extend(job.image_urls.iter().cloned());
                }
                JobStatus::Failed => {
                    tally.failed += 1;
                    tally.failed_points += job.points_cost;
                }
            }
        }
        tally
    }

    /// Jobs that count towards progress.
    pub fn denominator(&self) -> usize {
        self.total - self.requeued
    }

    /// `round(100 * finished / denominator)`, 0 for an empty denominator.
    pub fn progress(&self) -> i16 {
        let denominator = self.denominator();
        if denominator == 0 {
            return 0;
        }
        let finished = (self.completed + self.failed) as f64;
        (100.0 * finished / denominator as f64).round() as i16
    }

    /// Every counted job is completed or failed.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }

    /// Settled, and every image the task paid for has a job row.
    ///
    /// A task whose fan-out is still being written (or stopped part way)
    /// is not complete; only a forced finalization closes it.
    pub fn covers(&self, total_images: i32) -> bool {
        self.is_settled() && self.denominator() >= usize::try_from(total_images).unwrap_or(0)
    }

    /// A job has left `pending`, so the task should show `processing`.
    pub fn has_started(&self) -> bool {
        self.processing + self.completed + self.failed > 0
    }
}

/// Terminal fields for a settled task.
///
/// Refund is `total_points - completed_points`, which equals the failed
/// jobs' cost when every job was written and also covers jobs that never
/// were. With no completed job the whole task is refunded.
pub fn plan_finalization(task: &Task, tally: &JobTally) -> TaskFinalization {
    let completed_points = tally.completed_points.min(task.total_points);
    let expected = usize::try_from(task.total_images).unwrap_or(0);
    let unsuccessful = expected.saturating_sub(tally.completed).max(tally.failed);

    if tally.completed == 0 {
        let refund = task.total_points;
        return TaskFinalization {
            status: TaskStatus::Failed,
            image_urls: Vec::new(),
            failed_reason: Some(format!(
                "All {expected} image generations failed; {refund} points refunded"
            )),
            refund,
            refund_description: format!("Full refund for failed task #{}", task.id),
            completed_images: 0,
        };
    }

    let refund = task.total_points - completed_points;
    let failed_reason = (unsuccessful > 0).then(|| {
        format!("{unsuccessful} of {expected} images failed; {refund} points refunded")
    });
    TaskFinalization {
        status: TaskStatus::Completed,
        image_urls: tally.image_urls.clone(),
        failed_reason,
        refund,
        refund_description: format!(
            "Partial refund for {unsuccessful} failed images in task #{}",
            task.id
        ),
        completed_images: tally.image_urls.len() as i64,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fanout_db::models::task::Json;

    use super::*;

    fn job(id: i64, status: JobStatus, cost: Points) -> Job {
        let now = Utc::now();
        Job {
            id,
            task_id: 7,
            user_id: 1,
            prompt: "a quiet harbour".into(),
            model_id: "flux-dev".into(),
            status,
            retries: 0,
            points_cost: cost,
            image_url: None,
            image_urls: if status == JobStatus::Completed {
                vec![format!("https://cdn.test/{id}.png")]
            } else {
                Vec::new()
            },
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn task(total_images: i32, total_points: Points) -> Task {
        let now = Utc::now();
        Task {
            id: 7,
            user_id: 1,
            prompt: "a quiet harbour".into(),
            model_configs: Json(Vec::new()),
            total_images,
            total_points,
            status: TaskStatus::Processing,
            progress: 0,
            transaction_id: Some(1),
            image_urls: Vec::new(),
            zip_url: None,
            failed_reason: None,
            refunded_points: 0,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    #[test]
    fn tally_counts_every_status() {
        let jobs = vec![
            job(1, JobStatus::Completed, 10),
            job(2, JobStatus::Failed, 10),
            job(3, JobStatus::Pending, 10),
            job(4, JobStatus::Processing, 10),
            job(5, JobStatus::Requeued, 10),
        ];
        let tally = JobTally::from_jobs(&jobs);

        assert_eq!(
            (tally.completed, tally.failed, tally.pending, tally.processing, tally.requeued),
            (1, 1, 1, 1, 1)
        );
        assert_eq!(tally.denominator(), 4);
        assert_eq!(tally.progress(), 50);
        assert_eq!(tally.completed_points, 10);
        assert_eq!(tally.failed_points, 10);
        assert_eq!(tally.image_urls, vec!["https://cdn.test/1.png"]);
        assert!(!tally.is_settled());
        assert!(!tally.covers(4));
        assert!(tally.has_started());
    }

    #[test]
    fn settled_but_short_fan_out_does_not_cover() {
        let jobs = vec![job(1, JobStatus::Completed, 10)];
        let tally = JobTally::from_jobs(&jobs);
        assert!(tally.is_settled());
        assert!(!tally.covers(3));
        assert!(tally.covers(1));
    }

    #[test]
    fn progress_rounds_and_handles_empty_denominator() {
        let jobs = vec![
            job(1, JobStatus::Completed, 5),
            job(2, JobStatus::Pending, 5),
            job(3, JobStatus::Pending, 5),
        ];
        assert_eq!(JobTally::from_jobs(&jobs).progress(), 33);

        let only_requeued = vec![job(1, JobStatus::Requeued, 5)];
        let tally = JobTally::from_jobs(&only_requeued);
        assert_eq!(tally.progress(), 0);
        assert!(tally.is_settled());
        assert!(!tally.has_started());
    }

    #[test]
    fn partial_failure_refunds_failed_cost() {
        let jobs = vec![
            job(1, JobStatus::Completed, 10),
            job(2, JobStatus::Completed, 10),
            job(3, JobStatus::Failed, 10),
        ];
        let plan = plan_finalization(&task(3, 30), &JobTally::from_jobs(&jobs));

        assert_eq!(plan.status, TaskStatus::Completed);
        assert_eq!(plan.refund, 10);
        assert_eq!(plan.image_urls.len(), 2);
        assert_eq!(plan.completed_images, 2);
        assert_eq!(
            plan.failed_reason.as_deref(),
            Some("1 of 3 images failed; 10 points refunded")
        );
    }

    #[test]
    fn total_failure_refunds_everything() {
        let jobs = vec![job(1, JobStatus::Failed, 20), job(2, JobStatus::Failed, 20)];
        let plan = plan_finalization(&task(2, 40), &JobTally::from_jobs(&jobs));

        assert_eq!(plan.status, TaskStatus::Failed);
        assert_eq!(plan.refund, 40);
        assert!(plan.image_urls.is_empty());
        assert!(plan.failed_reason.unwrap().starts_with("All 2 image generations failed"));
    }

    #[test]
    fn full_success_refunds_nothing() {
        let jobs = vec![job(1, JobStatus::Completed, 15), job(2, JobStatus::Completed, 15)];
        let plan = plan_finalization(&task(2, 30), &JobTally::from_jobs(&jobs));

        assert_eq!(plan.status, TaskStatus::Completed);
        assert_eq!(plan.refund, 0);
        assert!(plan.failed_reason.is_none());
    }

    #[test]
    fn missing_jobs_are_refunded() {
        // Four images paid for, only two jobs ever written.
        let jobs = vec![job(1, JobStatus::Completed, 10), job(2, JobStatus::Failed, 10)];
        let plan = plan_finalization(&task(4, 40), &JobTally::from_jobs(&jobs));

        assert_eq!(plan.status, TaskStatus::Completed);
        assert_eq!(plan.refund, 30);
        assert_eq!(plan.refund + 10, 40);
        assert_eq!(
            plan.failed_reason.as_deref(),
            Some("3 of 4 images failed; 30 points refunded")
        );
    }

    #[test]
    fn requeued_rows_do_not_count_towards_refund() {
        let jobs = vec![
            job(1, JobStatus::Requeued, 10),
            job(2, JobStatus::Completed, 10),
            job(3, JobStatus::Completed, 10),
        ];
        let plan = plan_finalization(&task(2, 20), &JobTally::from_jobs(&jobs));
        assert_eq!(plan.refund, 0);
        assert!(plan.failed_reason.is_none());
    }
}
