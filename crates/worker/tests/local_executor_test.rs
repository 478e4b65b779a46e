mod common;

use std::sync::Arc;
use std::time::Duration;

use orchestrator_dispatcher::TaskSubmission;
use orchestrator_domain::{ActionExecutor, BackendKind, TaskRepository, TaskStatus};
use orchestrator_testing_utils::{ScriptedActionExecutor, TestEnv};

use common::{Stack, StackOptions};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let actions = Arc::new(ScriptedActionExecutor::transient_failures(2));
    let stack = Stack::new(actions.clone() as Arc<dyn ActionExecutor>, StackOptions::default());

    let task = stack
        .submissions
        .submit(TaskSubmission::new("deploy", "alice"))
        .await
        .unwrap();

    let s = &stack;
    let id = task.id;
    let finished = TestEnv::wait_for(
        || async move {
            s.scheduler.run_admission_cycle().await.unwrap();
            s.tasks.get_required(id).await.unwrap().status == TaskStatus::Succeeded
        },
        WAIT,
    )
    .await;
    assert!(finished, "任务没有在重试后成功");

    let task = stack.tasks.get_required(id).await.unwrap();
    assert_eq!(task.attempt_count, 3);
    assert_eq!(task.backend, Some(BackendKind::Local));
    assert!(task.last_error.is_none());
    let attempts: Vec<u32> = actions.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(task.logs.iter().any(|l| l.message == "开始执行 deploy"));
}

#[tokio::test]
async fn test_local_pool_respects_concurrency() {
    let actions = Arc::new(ScriptedActionExecutor::blocking());
    let stack = Stack::new(actions.clone() as Arc<dyn ActionExecutor>, StackOptions::default());

    for _ in 0..3 {
        stack
            .submissions
            .submit(TaskSubmission::new("deploy", "alice"))
            .await
            .unwrap();
    }
    stack.scheduler.run_admission_cycle().await.unwrap();

    let s = &stack;
    let two_running = TestEnv::wait_for(
        || async move {
            s.tasks
                .list_by_status(&[TaskStatus::Running])
                .await
                .unwrap()
                .len()
                == 2
        },
        WAIT,
    )
    .await;
    assert!(two_running);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stack.local.busy_slots(), 2);
    assert_eq!(stack.local.active_runs().await, 3);
    assert_eq!(actions.call_count(), 2);
    assert_eq!(
        stack.tasks.list_by_status(&[TaskStatus::Queued]).await.unwrap().len(),
        1
    );

    stack.local.shutdown().await;
    let drained = TestEnv::wait_for(|| async move { s.local.active_runs().await == 0 }, WAIT).await;
    assert!(drained);
}

#[tokio::test]
async fn test_cancel_stops_local_run_without_report() {
    let actions = Arc::new(ScriptedActionExecutor::blocking());
    let stack = Stack::new(actions.clone() as Arc<dyn ActionExecutor>, StackOptions::default());

    let task = stack
        .submissions
        .submit(TaskSubmission::new("deploy", "alice"))
        .await
        .unwrap();
    stack.scheduler.run_admission_cycle().await.unwrap();
    let running = TestEnv::wait_for_status(stack.tasks.as_ref(), task.id, TaskStatus::Running, WAIT)
        .await
        .unwrap();
    assert_eq!(running.status, TaskStatus::Running);

    stack.controller.cancel(task.id, "alice", None).await.unwrap();

    let s = &stack;
    let drained = TestEnv::wait_for(|| async move { s.local.active_runs().await == 0 }, WAIT).await;
    assert!(drained);

    let task = stack.tasks.get_required(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.attempt_count, 0);
    assert!(task.last_error.is_none());
}

#[tokio::test]
async fn test_submit_after_shutdown_is_refused() {
    let stack = Stack::new(
        Arc::new(ScriptedActionExecutor::always_succeed()),
        StackOptions::default(),
    );
    stack.local.shutdown().await;

    let task = stack
        .submissions
        .submit(TaskSubmission::new("deploy", "alice"))
        .await
        .unwrap();
    let _ = stack.scheduler.run_admission_cycle().await;

    let task = stack.tasks.get_required(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.run_id.is_none());
}
