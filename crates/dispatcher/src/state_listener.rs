use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_core::config::MessageQueueConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    AttemptRef, BackendKind, ExecutionReporter, ExecutionUpdate, Message, MessageQueue,
    MessageType, StatusUpdateMessage, TaskControlAction, TaskControlMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::worker_registry::WorkerRegistry;

const DISPATCHER_REQUESTER: &str = "dispatcher";

/// 消费 Worker 回报的状态更新与心跳
pub struct StateListener {
    message_queue: Arc<dyn MessageQueue>,
    reporter: Arc<dyn ExecutionReporter>,
    registry: Arc<WorkerRegistry>,
    config: MessageQueueConfig,
}

impl StateListener {
    pub fn new(
        message_queue: Arc<dyn MessageQueue>,
        reporter: Arc<dyn ExecutionReporter>,
        registry: Arc<WorkerRegistry>,
        config: MessageQueueConfig,
    ) -> Self {
        Self {
            message_queue,
            reporter,
            registry,
            config,
        }
    }

    /// 处理两个队列中当前可用的全部消息，返回处理条数
    pub async fn poll_once(&self) -> OrchestratorResult<usize> {
        let mut processed = 0;
        for queue in [&self.config.heartbeat_queue, &self.config.status_queue] {
            let messages = self.message_queue.consume_messages(queue).await?;
            processed += messages.len();
            for message in messages {
                if let Err(e) = self.process_message(&message).await {
                    error!(queue = %queue, message.id = %message.id, error = %e, "处理消息失败");
                }
            }
        }
        Ok(processed)
    }

    async fn process_message(&self, message: &Message) -> OrchestratorResult<()> {
        match &message.message_type {
            MessageType::StatusUpdate(update) => self.process_status_update(update).await,
            MessageType::WorkerHeartbeat(heartbeat) => {
                self.registry.record_heartbeat(heartbeat).await.map(|_| ())
            }
            _ => {
                debug!("忽略不支持的消息类型: {}", message.message_type_str());
                Ok(())
            }
        }
    }

    async fn process_status_update(&self, message: &StatusUpdateMessage) -> OrchestratorResult<()> {
        let attempt = AttemptRef {
            task_id: message.task_id,
            run_id: message.run_id.clone(),
            backend: BackendKind::Distributed,
            worker_id: Some(message.worker_id.clone()),
        };

        match &message.update {
            ExecutionUpdate::Claimed => {
                let accepted = self.reporter.on_claimed(&attempt).await?.is_some();
                self.answer_claim(message, accepted).await?;
            }
            ExecutionUpdate::Log { message: line } => {
                self.reporter.on_log(message.task_id, line.clone()).await?;
            }
            ExecutionUpdate::Progress { percent, message: note } => {
                self.reporter
                    .on_progress(message.task_id, *percent, note.clone())
                    .await?;
            }
            ExecutionUpdate::Succeeded {
                output,
                duration_ms,
            } => {
                self.registry
                    .record_completion(&message.worker_id, *duration_ms, true)
                    .await?;
                if self
                    .reporter
                    .on_succeeded(&attempt, output.clone(), *duration_ms)
                    .await?
                    .is_none()
                {
                    info!(task.id = message.task_id, worker.id = %message.worker_id, "过期运行的成功回报已忽略");
                }
            }
            ExecutionUpdate::Failed {
                failure,
                duration_ms,
            } => {
                self.registry
                    .record_completion(&message.worker_id, *duration_ms, false)
                    .await?;
                if self
                    .reporter
                    .on_failed(&attempt, failure.clone(), *duration_ms)
                    .await?
                    .is_none()
                {
                    info!(task.id = message.task_id, worker.id = %message.worker_id, "过期运行的失败回报已忽略");
                }
            }
        }
        Ok(())
    }

    /// Worker 收到应答前不会执行动作，拒绝即放弃这次运行
    async fn answer_claim(
        &self,
        message: &StatusUpdateMessage,
        accepted: bool,
    ) -> OrchestratorResult<()> {
        let action = if accepted {
            TaskControlAction::ClaimAccepted
        } else {
            warn!(
                task.id = message.task_id,
                worker.id = %message.worker_id,
                run.id = %message.run_id,
                "认领被拒绝，通知Worker放弃"
            );
            TaskControlAction::ClaimRejected
        };
        let control = Message::task_control(TaskControlMessage {
            task_id: message.task_id,
            run_id: Some(message.run_id.clone()),
            action,
            requester: DISPATCHER_REQUESTER.to_string(),
            timestamp: Utc::now(),
        });
        self.message_queue
            .publish_message(&self.config.control_queue_for(&message.worker_id), &control)
            .await
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            status_queue = %self.config.status_queue,
            heartbeat_queue = %self.config.heartbeat_queue,
            "状态监听器已启动"
        );
        let idle = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let delay = match self.poll_once().await {
                Ok(0) => idle,
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!(error = %e, "消费状态队列失败");
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("状态监听器已停止");
    }
}
