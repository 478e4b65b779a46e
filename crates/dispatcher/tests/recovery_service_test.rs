mod common;

use chrono::Duration;
use orchestrator_core::config::RecoveryConfig;
use orchestrator_core::Clock;
use orchestrator_dispatcher::RecoverySource;
use orchestrator_domain::{failure_reason, BackendKind, ExecutionReporter, TaskStatus};
use orchestrator_testing_utils::{NewTaskBuilder, TestEnv};

use common::{Harness, HarnessConfig};

fn harness() -> Harness {
    Harness::with_config(HarnessConfig {
        recovery: RecoveryConfig {
            enabled: true,
            interval_seconds: 60,
            timeout_seconds: 3600,
            stale_seconds: 120,
            startup_stale_seconds: 0,
        },
        ..HarnessConfig::default()
    })
}

#[tokio::test]
async fn test_task_silent_past_timeout_is_failed() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;

    h.clock.advance(Duration::seconds(3601));
    let report = h.recovery.recover_periodic().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let failed = h.get(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 0);
    let last_error = failed.last_error.unwrap();
    assert_eq!(last_error.reason, failure_reason::RECOVERY_TIMEOUT);

    let cancelled = h.local.cancelled();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].run_id, task.run_id.unwrap());
}

#[tokio::test]
async fn test_stale_task_is_resubmitted_with_incremented_attempts() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;
    let old_run = task.run_id.clone().unwrap();

    h.clock.advance(Duration::seconds(121));
    let report = h.recovery.recover_periodic().await.unwrap();
    assert_eq!(report.retried, 1);

    let requeued = h.get(task.id).await;
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.attempt_count, 1);
    assert_eq!(requeued.backend, Some(BackendKind::Local));
    assert_ne!(requeued.run_id.as_deref(), Some(old_run.as_str()));
    assert!(requeued
        .logs
        .iter()
        .any(|l| l.message.contains(RecoverySource::Periodic.as_str())));

    assert_eq!(h.local.submitted_ids(), vec![task.id]);
    assert_eq!(h.local.cancelled()[0].run_id, old_run);
}

#[tokio::test]
async fn test_fresh_tasks_are_left_alone() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;

    h.clock.advance(Duration::seconds(60));
    let report = h.recovery.recover_periodic().await.unwrap();

    assert_eq!(report, Default::default());
    assert_eq!(h.get(task.id).await.version, task.version);
}

#[tokio::test]
async fn test_stale_backlog_tasks_are_skipped() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    let backlog = TestEnv::force(h.tasks.as_ref(), &task, |t| t.status = TaskStatus::Queued)
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(600));
    let report = h.recovery.recover_periodic().await.unwrap();

    assert_eq!(report.skipped, 1);
    let unchanged = h.get(task.id).await;
    assert_eq!(unchanged.status, TaskStatus::Queued);
    assert_eq!(unchanged.version, backlog.version);
}

#[tokio::test]
async fn test_backlog_task_past_timeout_is_failed() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    TestEnv::force(h.tasks.as_ref(), &task, |t| t.status = TaskStatus::Queued)
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(7200));
    let report = h.recovery.recover_periodic().await.unwrap();

    assert_eq!(report.failed, 1);
    let failed = h.get(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.last_error.unwrap().reason, failure_reason::RECOVERY_TIMEOUT);
    assert!(h.local.cancelled().is_empty());
}

#[tokio::test]
async fn test_recovery_that_would_exhaust_attempts_fails_the_task() {
    let h = harness();
    let task = h
        .running(NewTaskBuilder::new().with_max_attempts(2).build())
        .await;
    let task = TestEnv::force(h.tasks.as_ref(), &task, |t| t.attempt_count = 1)
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(121));
    let report = h.recovery.recover_periodic().await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h.get(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 2);
    assert_eq!(
        failed.last_error.unwrap().reason,
        failure_reason::RECOVERY_RETRIES_EXHAUSTED
    );
    assert!(h.local.submitted().is_empty());
}

#[tokio::test]
async fn test_startup_recovery_treats_every_in_flight_task_as_stale() {
    let h = harness();
    let running = h.running(NewTaskBuilder::new().build()).await;
    let submitted = h.submitted(NewTaskBuilder::new().build()).await;
    let pending = h.create(NewTaskBuilder::new().build()).await;

    let report = h.recovery.recover_on_startup().await.unwrap();
    assert_eq!(report.retried, 2);

    for id in [running.id, submitted.id] {
        let task = h.get(id).await;
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempt_count, 1);
        assert!(task
            .logs
            .iter()
            .any(|l| l.message.contains(RecoverySource::Startup.as_str())));
    }
    assert_eq!(h.get(pending.id).await.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_stale_task_without_backend_returns_to_backlog() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;
    h.local.set_healthy(false);

    h.clock.advance(Duration::seconds(121));
    let report = h.recovery.recover_periodic().await.unwrap();
    assert_eq!(report.retried, 1);

    let released = h.get(task.id).await;
    assert_eq!(released.status, TaskStatus::Queued);
    assert_eq!(released.attempt_count, 1);
    assert!(released.backend.is_none());
    assert!(released.run_id.is_none());
    assert!(released.is_admissible(h.clock.now()));
}

#[tokio::test]
async fn test_resubmission_rejected_by_backend_releases_task() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;
    h.local.reject_submissions(true);

    h.clock.advance(Duration::seconds(121));
    h.recovery.recover_periodic().await.unwrap();

    let released = h.get(task.id).await;
    assert_eq!(released.status, TaskStatus::Queued);
    assert_eq!(released.attempt_count, 1);
    assert!(released.backend.is_none());
}

#[tokio::test]
async fn test_late_report_from_recovered_run_is_ignored() {
    let h = harness();
    let task = h.running(NewTaskBuilder::new().build()).await;
    let old_attempt = Harness::attempt(&task);

    h.clock.advance(Duration::seconds(121));
    h.recovery.recover_periodic().await.unwrap();

    let ignored = h
        .coordinator
        .on_succeeded(&old_attempt, None, 10)
        .await
        .unwrap();
    assert!(ignored.is_none());
    assert_eq!(h.get(task.id).await.status, TaskStatus::Queued);
}
