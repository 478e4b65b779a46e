mod common;

use orchestrator_core::Clock;

use chrono::Duration;
use orchestrator_core::config::{RetryConfig, RetryPolicyConfig};
use orchestrator_domain::{
    failure_reason, ExecutionFailure, ExecutionReporter, TaskRepository, TaskStatus,
};
use orchestrator_testing_utils::NewTaskBuilder;

use common::{Harness, HarnessConfig};

fn harness() -> Harness {
    Harness::with_config(HarnessConfig {
        retry: RetryConfig {
            default_policy: RetryPolicyConfig {
                max_retries: 3,
                base_delay_seconds: 5.0,
                backoff_multiplier: 2.0,
                max_delay_seconds: 60.0,
                retryable_error_kinds: vec![],
            },
            ..RetryConfig::default()
        },
        ..HarnessConfig::default()
    })
}

/// 准入并认领，返回运行中的任务
async fn admit_and_claim(h: &Harness, task_id: i64) -> orchestrator_domain::Task {
    h.scheduler.run_admission_cycle().await.unwrap();
    let queued = h.get(task_id).await;
    h.coordinator
        .on_claimed(&Harness::attempt(&queued))
        .await
        .unwrap()
        .expect("claim must succeed")
}

#[tokio::test]
async fn test_two_transient_failures_then_success_records_three_attempts() {
    let h = harness();
    let task = h
        .create(NewTaskBuilder::new().with_max_attempts(3).build())
        .await;

    let running = admit_and_claim(&h, task.id).await;
    let after_first = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("network", "reset"),
            120,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_first.status, TaskStatus::Queued);
    assert_eq!(after_first.attempt_count, 1);
    assert!(after_first.backend.is_none());
    assert_eq!(
        after_first.next_attempt_at,
        Some(h.clock.now() + Duration::seconds(5))
    );
    assert_eq!(
        after_first.last_error.as_ref().unwrap().reason,
        failure_reason::ATTEMPT_FAILED
    );

    // 退避期间不会被准入
    h.scheduler.run_admission_cycle().await.unwrap();
    assert_eq!(h.local.submitted().len(), 1);

    h.clock.advance(Duration::seconds(5));
    let running = admit_and_claim(&h, task.id).await;
    let after_second = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("network", "reset"),
            80,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_second.attempt_count, 2);
    assert_eq!(
        after_second.next_attempt_at,
        Some(h.clock.now() + Duration::seconds(10))
    );

    h.clock.advance(Duration::seconds(10));
    let running = admit_and_claim(&h, task.id).await;
    let done = h
        .coordinator
        .on_succeeded(&Harness::attempt(&running), Some("deployed".into()), 50)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt_count, 3);
    assert_eq!(h.local.submitted().len(), 3);

    let logs = h.get(task.id).await.logs;
    assert!(logs.iter().any(|l| l.message.contains("deployed")));
}

#[tokio::test]
async fn test_single_attempt_task_fails_immediately_on_retryable_error() {
    let h = harness();
    let task = h
        .create(NewTaskBuilder::new().with_max_attempts(1).build())
        .await;
    let running = admit_and_claim(&h, task.id).await;

    let failed = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("network", "timeout"),
            10,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.attempt_count <= failed.max_attempts);
    let last_error = failed.last_error.unwrap();
    assert_eq!(last_error.reason, failure_reason::RETRIES_EXHAUSTED);
    assert_eq!(last_error.attempts, 1);
    assert!(!last_error.message.is_empty());
}

#[tokio::test]
async fn test_per_kind_retry_cap_bounds_a_larger_task_limit() {
    let h = {
        let mut retry = RetryConfig::default();
        retry.default_policy.base_delay_seconds = 0.0;
        retry.policies.insert(
            "migrate".into(),
            RetryPolicyConfig {
                max_retries: 2,
                base_delay_seconds: 0.0,
                ..RetryPolicyConfig::default()
            },
        );
        Harness::with_config(HarnessConfig {
            retry,
            ..HarnessConfig::default()
        })
    };
    let task = h
        .create(
            NewTaskBuilder::new()
                .with_kind("migrate")
                .with_max_attempts(10)
                .build(),
        )
        .await;

    let running = admit_and_claim(&h, task.id).await;
    let retrying = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("network", "reset"),
            10,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retrying.status, TaskStatus::Queued);

    let running = admit_and_claim(&h, task.id).await;
    let failed = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("network", "reset"),
            10,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempt_count, 2);
    assert_eq!(
        failed.last_error.unwrap().reason,
        failure_reason::RETRIES_EXHAUSTED
    );
}

#[tokio::test]
async fn test_permanent_error_is_never_retried() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    let running = admit_and_claim(&h, task.id).await;

    let failed = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::permanent("invalid_manifest", "image tag missing"),
            10,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.last_error.unwrap().reason,
        failure_reason::PERMANENT_ERROR
    );
}

#[tokio::test]
async fn test_error_kind_outside_policy_is_not_retried() {
    let mut retry = RetryConfig::default();
    retry.policies.insert(
        "migrate".into(),
        RetryPolicyConfig {
            retryable_error_kinds: vec!["lock_timeout".into()],
            ..RetryPolicyConfig::default()
        },
    );
    let h = Harness::with_config(HarnessConfig {
        retry,
        ..HarnessConfig::default()
    });
    let task = h
        .create(NewTaskBuilder::new().with_kind("migrate").build())
        .await;
    let running = admit_and_claim(&h, task.id).await;

    let failed = h
        .coordinator
        .on_failed(
            &Harness::attempt(&running),
            ExecutionFailure::transient("disk_full", "no space left"),
            10,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    let last_error = failed.last_error.unwrap();
    assert_eq!(last_error.reason, failure_reason::NON_RETRYABLE_KIND);
    assert_eq!(last_error.error_kind.as_deref(), Some("disk_full"));
}

#[tokio::test]
async fn test_reports_from_a_stale_run_are_ignored() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    let running = admit_and_claim(&h, task.id).await;

    let mut stale = Harness::attempt(&running);
    stale.run_id = "previous-run".into();

    assert!(h
        .coordinator
        .on_succeeded(&stale, None, 10)
        .await
        .unwrap()
        .is_none());
    assert!(h
        .coordinator
        .on_failed(&stale, ExecutionFailure::transient("network", "x"), 10)
        .await
        .unwrap()
        .is_none());

    let unchanged = h.get(task.id).await;
    assert_eq!(unchanged.status, TaskStatus::Running);
    assert_eq!(unchanged.version, running.version);
}

#[tokio::test]
async fn test_concurrent_claims_for_one_run_yield_one_execution() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    h.scheduler.run_admission_cycle().await.unwrap();
    let queued = h.get(task.id).await;

    let mut first = Harness::attempt(&queued);
    first.worker_id = Some("w1".into());
    let mut second = Harness::attempt(&queued);
    second.worker_id = Some("w2".into());

    let (a, b) = tokio::join!(
        h.coordinator.on_claimed(&first),
        h.coordinator.on_claimed(&second)
    );
    let claimed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(claimed.len(), 1);
    let stored = h.tasks.get_required(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Running);
    assert_eq!(stored.worker_id, claimed[0].worker_id);
}

#[tokio::test]
async fn test_claim_after_cancel_is_refused() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    h.scheduler.run_admission_cycle().await.unwrap();
    let queued = h.get(task.id).await;

    h.controller.cancel(task.id, "bob", None).await.unwrap();

    assert!(h
        .coordinator
        .on_claimed(&Harness::attempt(&queued))
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.get(task.id).await.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_late_log_on_terminal_task_is_accepted() {
    let h = harness();
    let task = h.create(NewTaskBuilder::new().build()).await;
    let running = admit_and_claim(&h, task.id).await;
    h.coordinator
        .on_succeeded(&Harness::attempt(&running), None, 5)
        .await
        .unwrap();
    let before = h.get(task.id).await;

    h.coordinator
        .on_log(task.id, "drained output".into())
        .await
        .unwrap();

    let after = h.get(task.id).await;
    assert_eq!(after.status, TaskStatus::Succeeded);
    assert_eq!(after.version, before.version);
    assert_eq!(after.logs.last().unwrap().message, "drained output");
}
