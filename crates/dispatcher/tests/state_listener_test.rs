mod common;

use orchestrator_core::Clock;

use std::sync::Arc;

use chrono::Utc;
use orchestrator_core::config::MessageQueueConfig;
use orchestrator_dispatcher::StateListener;
use orchestrator_domain::{
    BackendKind, ExecutionFailure, ExecutionUpdate, Message, MessageQueue, MessageType,
    StatusUpdateMessage, Task, TaskControlAction, TaskStatus, WorkerHeartbeatMessage,
    WorkerStatus,
};
use orchestrator_infrastructure::InMemoryMessageQueue;
use orchestrator_testing_utils::{NewTaskBuilder, TestEnv};

use common::Harness;

struct Fixture {
    h: Harness,
    queue: Arc<InMemoryMessageQueue>,
    config: MessageQueueConfig,
    listener: StateListener,
}

fn fixture() -> Fixture {
    let h = Harness::new();
    let queue = Arc::new(InMemoryMessageQueue::new());
    let config = common::message_queue_config();
    let listener = StateListener::new(
        queue.clone(),
        h.coordinator.clone(),
        h.registry.clone(),
        config.clone(),
    );
    Fixture {
        h,
        queue,
        config,
        listener,
    }
}

impl Fixture {
    async fn send(&self, task: &Task, worker_id: &str, update: ExecutionUpdate) {
        let message = Message::status_update(StatusUpdateMessage {
            task_id: task.id,
            run_id: task.run_id.clone().unwrap(),
            worker_id: worker_id.to_string(),
            update,
            timestamp: Utc::now(),
        });
        self.queue
            .publish_message(&self.config.status_queue, &message)
            .await
            .unwrap();
    }

    async fn heartbeat(&self, worker_id: &str) {
        let message = Message::worker_heartbeat(WorkerHeartbeatMessage {
            worker_id: worker_id.to_string(),
            hostname: "deploy-01".to_string(),
            queues: vec!["default".to_string()],
            current_task_count: 1,
            timestamp: Utc::now(),
        });
        self.queue
            .publish_message(&self.config.heartbeat_queue, &message)
            .await
            .unwrap();
    }

    /// 构造一个已提交给分布式后端的任务
    async fn distributed_task(&self) -> Task {
        let task = self.h.create(NewTaskBuilder::new().build()).await;
        TestEnv::force(self.h.tasks.as_ref(), &task, |t| {
            t.status = TaskStatus::Queued;
            t.assign_submission(BackendKind::Distributed);
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_heartbeat_registers_worker() {
    let f = fixture();
    f.heartbeat("w1").await;

    let processed = f.listener.poll_once().await.unwrap();
    assert_eq!(processed, 1);

    let worker = f.h.registry.get("w1").await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Online);
    assert_eq!(worker.hostname, "deploy-01");
    assert_eq!(worker.current_task_count, 1);
    assert_eq!(worker.last_heartbeat, f.h.clock.now());
    assert!(f.h.registry.has_online_workers().await.unwrap());
}

#[tokio::test]
async fn test_worker_reports_drive_task_to_success() {
    let f = fixture();
    f.heartbeat("w1").await;
    let task = f.distributed_task().await;

    f.send(&task, "w1", ExecutionUpdate::Claimed).await;
    f.send(
        &task,
        "w1",
        ExecutionUpdate::Log {
            message: "kubectl apply".into(),
        },
    )
    .await;
    f.send(
        &task,
        "w1",
        ExecutionUpdate::Succeeded {
            output: Some("rolled out".into()),
            duration_ms: 200,
        },
    )
    .await;

    assert_eq!(f.listener.poll_once().await.unwrap(), 4);

    let done = f.h.get(task.id).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt_count, 1);
    assert_eq!(done.worker_id.as_deref(), Some("w1"));
    assert!(done.logs.iter().any(|l| l.message == "kubectl apply"));

    let worker = f.h.registry.get("w1").await.unwrap().unwrap();
    assert_eq!(worker.success_count, 1);
}

#[tokio::test]
async fn test_worker_failure_schedules_retry() {
    let f = fixture();
    let task = f.distributed_task().await;

    f.send(&task, "w1", ExecutionUpdate::Claimed).await;
    f.send(
        &task,
        "w1",
        ExecutionUpdate::Failed {
            failure: ExecutionFailure::transient("network", "registry unreachable"),
            duration_ms: 40,
        },
    )
    .await;
    f.listener.poll_once().await.unwrap();

    let retrying = f.h.get(task.id).await;
    assert_eq!(retrying.status, TaskStatus::Queued);
    assert_eq!(retrying.attempt_count, 1);
    assert!(retrying.backend.is_none());
    assert!(retrying.next_attempt_at.is_some());
}

#[tokio::test]
async fn test_rejected_claim_tells_worker_to_abandon_run() {
    let f = fixture();
    let task = f.distributed_task().await;
    f.h.controller.cancel(task.id, "alice", None).await.unwrap();

    f.send(&task, "w7", ExecutionUpdate::Claimed).await;
    f.listener.poll_once().await.unwrap();

    assert_eq!(f.h.get(task.id).await.status, TaskStatus::Cancelled);

    let control = f
        .queue
        .consume_messages(&f.config.control_queue_for("w7"))
        .await
        .unwrap();
    assert_eq!(control.len(), 1);
    match &control[0].message_type {
        MessageType::TaskControl(message) => {
            assert_eq!(message.task_id, task.id);
            assert_eq!(message.run_id, task.run_id);
            assert_eq!(message.action, TaskControlAction::ClaimRejected);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_accepted_claim_is_acknowledged_to_worker() {
    let f = fixture();
    let task = f.distributed_task().await;

    f.send(&task, "w3", ExecutionUpdate::Claimed).await;
    f.listener.poll_once().await.unwrap();
    assert_eq!(f.h.get(task.id).await.status, TaskStatus::Running);

    let control = f
        .queue
        .consume_messages(&f.config.control_queue_for("w3"))
        .await
        .unwrap();
    assert_eq!(control.len(), 1);
    let MessageType::TaskControl(message) = &control[0].message_type else {
        panic!("期望控制消息");
    };
    assert_eq!(message.run_id, task.run_id);
    assert_eq!(message.action, TaskControlAction::ClaimAccepted);
}

#[tokio::test]
async fn test_report_for_unknown_task_does_not_stop_polling() {
    let f = fixture();
    let mut ghost = f.distributed_task().await;
    ghost.id = 4242;
    let real = f.distributed_task().await;

    f.send(&ghost, "w1", ExecutionUpdate::Claimed).await;
    f.send(&real, "w1", ExecutionUpdate::Claimed).await;

    assert_eq!(f.listener.poll_once().await.unwrap(), 2);
    assert_eq!(f.h.get(real.id).await.status, TaskStatus::Running);
}
