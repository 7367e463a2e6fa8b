//! Duplicate deliveries and racing finalizers.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{harness, request, FakeGenerator};
use fanout_db::models::status::{JobStatus, TaskStatus, TransactionType};
use fanout_db::Store;
use fanout_events::PipelineEvent;
use fanout_pipeline::aggregator::{on_job_status_changed, AggregationOutcome};
use fanout_pipeline::dispatch::handle_event;
use fanout_pipeline::executor::{execute_job, ExecutionOutcome};
use fanout_pipeline::reconciler::force_finalize;
use fanout_pipeline::{create_task, FinalizeTrigger};

#[tokio::test]
async fn duplicate_job_created_generates_once() {
    let h = harness(FakeGenerator::new());
    let user = h.user(100).await;
    let mut rx = h.ctx.bus.subscribe();

    let receipt = create_task(&h.ctx, request(user.id, &[("flux-dev", 1)]))
        .await
        .unwrap();
    let job = &h.store.list_jobs(receipt.task_id).await.unwrap()[0];
    for _ in 0..3 {
        h.ctx.bus.publish(PipelineEvent::JobCreated {
            task_id: receipt.task_id,
            job_id: job.id,
        });
    }

    h.drain(&mut rx).await;

    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.task(receipt.task_id).await.status, TaskStatus::Completed);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pickup_claims_once() {
    let h = harness(FakeGenerator::new().with_delay(Duration::from_millis(50)));
    let user = h.user(100).await;

    let receipt = create_task(&h.ctx, request(user.id, &[("flux-dev", 1)]))
        .await
        .unwrap();
    let job_id = h.store.list_jobs(receipt.task_id).await.unwrap()[0].id;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = h.ctx.clone();
            tokio::spawn(async move { execute_job(&ctx, job_id).await.unwrap() })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ExecutionOutcome::Completed { .. } | ExecutionOutcome::Skipped { .. })));
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_finalizers_refund_and_notify_once() {
    let h = harness(FakeGenerator::new().failing("imagen-3", Some(400)));
    let user = h.user(100).await;

    let receipt = create_task(&h.ctx, request(user.id, &[("flux-dev", 2), ("imagen-3", 1)]))
        .await
        .unwrap();
    let jobs = h.store.list_jobs(receipt.task_id).await.unwrap();
    for job in &jobs {
        execute_job(&h.ctx, job.id).await.unwrap();
    }
    let last = jobs.last().unwrap().id;
    let task_id = receipt.task_id;

    let mut aggregators = Vec::new();
    for _ in 0..8 {
        let ctx = h.ctx.clone();
        aggregators.push(tokio::spawn(async move {
            on_job_status_changed(&ctx, task_id, last, JobStatus::Processing, JobStatus::Failed)
                .await
                .unwrap()
        }));
    }
    let mut reconcilers = Vec::new();
    for _ in 0..3 {
        let ctx = h.ctx.clone();
        reconcilers.push(tokio::spawn(async move {
            force_finalize(&ctx, task_id, "timed out", FinalizeTrigger::Timeout)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in aggregators {
        if let AggregationOutcome::Finalized(_) = handle.await.unwrap() {
            winners += 1;
        }
    }
    for handle in reconcilers {
        let (force_failed, report) = handle.await.unwrap();
        assert_eq!(force_failed, 0);
        if report.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let refunds: Vec<_> = h
        .store
        .ledger_for(user.id)
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 10);
    assert_eq!(refunds[0].related_task_id, Some(task_id));
    assert_eq!(h.notifier.count(), 1);
    assert_eq!(h.gallery.published.lock().unwrap().len(), 1);
    assert_eq!(h.balance(user.id).await, 80);
    h.assert_conserved(task_id).await;
}

#[tokio::test]
async fn late_events_after_finalization_are_ignored() {
    let h = harness(FakeGenerator::new());
    let user = h.user(100).await;
    let mut rx = h.ctx.bus.subscribe();

    let receipt = create_task(&h.ctx, request(user.id, &[("sdxl", 2)]))
        .await
        .unwrap();
    h.drain(&mut rx).await;
    let job_id = h.store.list_jobs(receipt.task_id).await.unwrap()[0].id;

    let outcome = on_job_status_changed(
        &h.ctx,
        receipt.task_id,
        job_id,
        JobStatus::Processing,
        JobStatus::Completed,
    )
    .await
    .unwrap();
    assert_matches!(outcome, AggregationOutcome::Ignored { reason: "task already final" });

    handle_event(
        &h.ctx,
        PipelineEvent::JobCreated {
            task_id: receipt.task_id,
            job_id,
        },
    )
    .await;
    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.notifier.count(), 1);
    assert_eq!(h.store.ledger_for(user.id).len(), 2);
}

#[tokio::test]
async fn progress_never_decreases() {
    let h = harness(FakeGenerator::new().failing("ideogram-v2", Some(500)));
    let user = h.user(200).await;
    let mut rx = h.ctx.bus.subscribe();

    let receipt = create_task(
        &h.ctx,
        request(user.id, &[("flux-schnell", 3), ("ideogram-v2", 1), ("sdxl", 2)]),
    )
    .await
    .unwrap();

    let mut observed = Vec::new();
    let mut quiet_rounds = 0;
    while quiet_rounds < 5 {
        match rx.try_recv() {
            Ok(event) => {
                quiet_rounds = 0;
                handle_event(&h.ctx, event).await;
                observed.push(h.task(receipt.task_id).await.progress);
            }
            Err(_) => {
                quiet_rounds += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{observed:?}");
    assert_eq!(observed.last(), Some(&100));

    // A stale event replayed after the fact cannot move progress back.
    h.store
        .record_progress(receipt.task_id, 10, false)
        .await
        .unwrap();
    assert_eq!(h.task(receipt.task_id).await.progress, 100);
}
