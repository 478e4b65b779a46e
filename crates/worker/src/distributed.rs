use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::config::MessageQueueConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    BackendKind, ExecutionBackend, ExecutionHandle, Message, MessageQueue, Task,
    TaskControlAction, TaskControlMessage, TaskExecutionMessage,
};
use tracing::{debug, info};

const DISPATCHER_REQUESTER: &str = "dispatcher";

/// 分布式Worker池后端
///
/// 任务按 `queue` 名称发布到代理，由任意一个消费该队列的Worker认领。
/// 代理负责持久化，编排进程重启后消息仍在。
pub struct DistributedBackend {
    message_queue: Arc<dyn MessageQueue>,
    config: MessageQueueConfig,
}

impl DistributedBackend {
    pub fn new(message_queue: Arc<dyn MessageQueue>, config: MessageQueueConfig) -> Self {
        Self {
            message_queue,
            config,
        }
    }
}

#[async_trait]
impl ExecutionBackend for DistributedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    async fn submit(&self, task: &Task) -> OrchestratorResult<ExecutionHandle> {
        let handle = ExecutionHandle::for_task(task).ok_or_else(|| {
            OrchestratorError::Internal(format!("任务 {} 没有运行标识", task.id))
        })?;

        let message = Message::task_execution(TaskExecutionMessage {
            task_id: task.id,
            run_id: handle.run_id.clone(),
            kind: task.kind.clone(),
            payload: task.payload.clone(),
            queue: task.queue.clone(),
            attempt: task.attempt_count + 1,
        });
        self.message_queue
            .publish_message(&task.queue, &message)
            .await?;

        debug!(task.id = task.id, queue = %task.queue, run.id = %handle.run_id, "任务已发布到代理");
        Ok(handle)
    }

    /// 已被认领的运行通过该Worker的控制队列取消；尚未认领的运行在认领时会被拒绝
    async fn cancel(&self, handle: &ExecutionHandle) -> OrchestratorResult<()> {
        let Some(worker_id) = &handle.worker_id else {
            debug!(task.id = handle.task_id, run.id = %handle.run_id, "运行尚未被认领，认领时会被拒绝");
            return Ok(());
        };

        let message = Message::task_control(TaskControlMessage {
            task_id: handle.task_id,
            run_id: Some(handle.run_id.clone()),
            action: TaskControlAction::Cancel,
            requester: DISPATCHER_REQUESTER.to_string(),
            timestamp: Utc::now(),
        });
        self.message_queue
            .publish_message(&self.config.control_queue_for(worker_id), &message)
            .await?;

        info!(task.id = handle.task_id, worker.id = %worker_id, "已向Worker发送取消消息");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.message_queue.is_healthy().await
    }
}
