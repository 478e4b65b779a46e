use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::config::{MessageQueueConfig, WorkerConfig};
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    ActionContext, ActionExecutor, ExecutionUpdate, Message, MessageQueue, MessageType,
    ProgressSink, StatusUpdateMessage, TaskControlAction, TaskControlMessage,
    TaskExecutionMessage, WorkerHeartbeatMessage,
};
use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_STATUS_UPDATE_RETRIES: u32 = 3;

/// 通过代理回报状态
#[derive(Clone)]
struct StatusPublisher {
    message_queue: Arc<dyn MessageQueue>,
    status_queue: String,
    worker_id: String,
}

impl StatusPublisher {
    async fn publish(&self, task_id: i64, run_id: &str, update: ExecutionUpdate) {
        let message = Message::status_update(StatusUpdateMessage {
            task_id,
            run_id: run_id.to_string(),
            worker_id: self.worker_id.clone(),
            update,
            timestamp: Utc::now(),
        });

        let mut retry_count = 0;
        loop {
            match self
                .message_queue
                .publish_message(&self.status_queue, &message)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    retry_count += 1;
                    error!(
                        task.id = task_id,
                        retry_count,
                        error = %e,
                        "发送状态更新失败"
                    );
                    if retry_count >= MAX_STATUS_UPDATE_RETRIES {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100 * (1 << retry_count))).await;
                }
            }
        }
    }
}

struct RunSink {
    publisher: StatusPublisher,
    task_id: i64,
    run_id: String,
}

#[async_trait]
impl ProgressSink for RunSink {
    async fn log(&self, message: String) {
        self.publisher
            .publish(self.task_id, &self.run_id, ExecutionUpdate::Log { message })
            .await;
    }

    async fn progress(&self, percent: u8, message: Option<String>) {
        self.publisher
            .publish(
                self.task_id,
                &self.run_id,
                ExecutionUpdate::Progress { percent, message },
            )
            .await;
    }
}

/// 一次运行的登记信息
struct RunEntry {
    task_id: i64,
    token: CancellationToken,
    /// 等待编排核心对认领的应答，收到后取走
    claim: Option<oneshot::Sender<bool>>,
}

/// 远程Worker进程
///
/// 从配置的队列拉取任务、执行动作、通过状态队列回报，并定期发送心跳。
/// 每个运行先回报认领，只有控制队列送来 `ClaimAccepted` 后才执行动作；
/// 被拒绝或在 `claim_timeout_seconds` 内没有应答的运行直接放弃。
pub struct WorkerRuntime {
    config: WorkerConfig,
    queue_config: MessageQueueConfig,
    message_queue: Arc<dyn MessageQueue>,
    actions: Arc<dyn ActionExecutor>,
    publisher: StatusPublisher,
    slots: Arc<Semaphore>,
    runs: Arc<Mutex<HashMap<String, RunEntry>>>,
}

impl WorkerRuntime {
    pub fn new(
        config: WorkerConfig,
        queue_config: MessageQueueConfig,
        message_queue: Arc<dyn MessageQueue>,
        actions: Arc<dyn ActionExecutor>,
    ) -> Self {
        let publisher = StatusPublisher {
            message_queue: message_queue.clone(),
            status_queue: queue_config.status_queue.clone(),
            worker_id: config.worker_id.clone(),
        };
        let slots = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            config,
            queue_config,
            message_queue,
            actions,
            publisher,
            slots,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub async fn current_task_count(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// 声明任务队列与本Worker的控制队列
    pub async fn declare_queues(&self) -> OrchestratorResult<()> {
        for queue in &self.config.queues {
            self.message_queue.create_queue(queue, true).await?;
        }
        self.message_queue
            .create_queue(&self.control_queue(), true)
            .await
    }

    fn control_queue(&self) -> String {
        self.queue_config.control_queue_for(&self.config.worker_id)
    }

    pub async fn send_heartbeat(&self) -> OrchestratorResult<()> {
        let current_task_count = self.current_task_count().await as u32;
        let message = Message::worker_heartbeat(WorkerHeartbeatMessage {
            worker_id: self.config.worker_id.clone(),
            hostname: self.config.hostname.clone(),
            queues: self.config.queues.clone(),
            current_task_count,
            timestamp: Utc::now(),
        });
        self.message_queue
            .publish_message(&self.queue_config.heartbeat_queue, &message)
            .await?;

        debug!(worker.id = %self.config.worker_id, tasks = current_task_count, "发送心跳");
        Ok(())
    }

    /// 处理控制消息后拉取任务，返回本轮认领的任务数
    ///
    /// 每条任务消息都先占用一个空闲槽位再出队，槽位用完即停止，
    /// 剩余消息留在代理中由其他Worker消费。
    pub async fn poll_once(&self) -> OrchestratorResult<usize> {
        for message in self.message_queue.consume_messages(&self.control_queue()).await? {
            let type_str = message.message_type_str();
            match message.message_type {
                MessageType::TaskControl(control) => self.handle_control(control).await,
                _ => debug!("控制队列中忽略消息: {}", type_str),
            }
        }

        let mut started = 0;
        'queues: for queue in &self.config.queues {
            loop {
                let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                    break 'queues;
                };
                let Some(message) = self.message_queue.consume_up_to(queue, 1).await?.pop() else {
                    continue 'queues;
                };
                let type_str = message.message_type_str();
                match message.message_type {
                    MessageType::TaskExecution(execution) => {
                        self.start_execution(execution, permit).await;
                        started += 1;
                    }
                    _ => debug!(queue = %queue, "任务队列中忽略消息: {}", type_str),
                }
            }
        }
        Ok(started)
    }

    async fn handle_control(&self, control: TaskControlMessage) {
        let mut runs = self.runs.lock().await;
        match control.action {
            TaskControlAction::Cancel => {
                let mut cancelled = 0;
                for (run_id, entry) in runs.iter() {
                    let matches = match &control.run_id {
                        Some(target) => target == run_id,
                        None => entry.task_id == control.task_id,
                    };
                    if matches {
                        entry.token.cancel();
                        cancelled += 1;
                    }
                }
                info!(
                    task.id = control.task_id,
                    requester = %control.requester,
                    cancelled,
                    "收到取消请求"
                );
            }
            TaskControlAction::ClaimAccepted | TaskControlAction::ClaimRejected => {
                let accepted = control.action == TaskControlAction::ClaimAccepted;
                let waiter = control
                    .run_id
                    .as_ref()
                    .and_then(|run_id| runs.get_mut(run_id))
                    .and_then(|entry| entry.claim.take());
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(accepted);
                    }
                    None => debug!(
                        task.id = control.task_id,
                        accepted, "认领应答没有对应的等待中运行"
                    ),
                }
            }
        }
    }

    async fn start_execution(&self, execution: TaskExecutionMessage, permit: OwnedSemaphorePermit) {
        let token = CancellationToken::new();
        let (claim_tx, claim_rx) = oneshot::channel();
        self.runs.lock().await.insert(
            execution.run_id.clone(),
            RunEntry {
                task_id: execution.task_id,
                token: token.clone(),
                claim: Some(claim_tx),
            },
        );

        let publisher = self.publisher.clone();
        let actions = self.actions.clone();
        let runs = self.runs.clone();
        let claim_timeout = Duration::from_secs(self.config.claim_timeout_seconds);

        tokio::spawn(async move {
            let _permit = permit;
            let task_id = execution.task_id;
            let run_id = execution.run_id.clone();

            publisher
                .publish(task_id, &run_id, ExecutionUpdate::Claimed)
                .await;

            let accepted = tokio::select! {
                _ = token.cancelled() => false,
                answer = tokio::time::timeout(claim_timeout, claim_rx) => match answer {
                    Ok(Ok(accepted)) => accepted,
                    Ok(Err(_)) => false,
                    Err(_) => {
                        warn!(task.id = task_id, run.id = %run_id, "等待认领应答超时");
                        false
                    }
                },
            };

            if accepted {
                Self::execute(publisher, actions, execution, token).await;
            } else {
                info!(task.id = task_id, run.id = %run_id, "认领未被接受，放弃本次运行");
            }
            runs.lock().await.remove(&run_id);
        });
    }

    async fn execute(
        publisher: StatusPublisher,
        actions: Arc<dyn ActionExecutor>,
        execution: TaskExecutionMessage,
        token: CancellationToken,
    ) {
        let task_id = execution.task_id;
        let run_id = execution.run_id.clone();
        info!(task.id = task_id, run.id = %run_id, kind = %execution.kind, attempt = execution.attempt, "开始执行任务");

        let ctx = ActionContext {
            task_id,
            kind: execution.kind,
            payload: execution.payload,
            attempt: execution.attempt,
            cancellation: token.clone(),
            progress: Arc::new(RunSink {
                publisher: publisher.clone(),
                task_id,
                run_id: run_id.clone(),
            }),
        };

        let started = Instant::now();
        let result = actions.execute(ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if token.is_cancelled() {
            info!(task.id = task_id, run.id = %run_id, "运行已取消，不再回报结果");
            return;
        }

        let update = match result {
            Ok(output) => ExecutionUpdate::Succeeded {
                output: output.output,
                duration_ms,
            },
            Err(failure) => {
                warn!(task.id = task_id, run.id = %run_id, %failure, "任务执行失败");
                ExecutionUpdate::Failed {
                    failure,
                    duration_ms,
                }
            }
        };
        publisher.publish(task_id, &run_id, update).await;
    }

    /// 取消所有运行
    pub async fn cancel_all(&self) {
        for entry in self.runs.lock().await.values() {
            entry.token.cancel();
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if let Err(e) = self.declare_queues().await {
            error!(error = %e, "声明队列失败");
        }
        info!(
            worker.id = %self.config.worker_id,
            queues = ?self.config.queues,
            "Worker已启动"
        );

        let mut heartbeat = interval(Duration::from_secs(self.config.heartbeat_interval_seconds));
        let mut poll = interval(Duration::from_millis(self.queue_config.poll_interval_ms));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        error!(error = %e, "发送心跳失败");
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "任务轮询失败");
                    }
                }
            }
        }

        self.cancel_all().await;
        info!(worker.id = %self.config.worker_id, "Worker已停止");
    }
}
