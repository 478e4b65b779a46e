use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::OrchestratorResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::TaskId;
use crate::execution::ExecutionFailure;

/// 代理上传输的消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageType {
    TaskExecution(TaskExecutionMessage),
    StatusUpdate(StatusUpdateMessage),
    WorkerHeartbeat(WorkerHeartbeatMessage),
    TaskControl(TaskControlMessage),
}

/// 分布式执行请求，按任务的 queue 名称路由
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecutionMessage {
    pub task_id: TaskId,
    pub run_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub attempt: u32,
}

/// Worker 回报的单次执行进展
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionUpdate {
    Claimed,
    Log {
        message: String,
    },
    Progress {
        percent: u8,
        message: Option<String>,
    },
    Succeeded {
        output: Option<String>,
        duration_ms: u64,
    },
    Failed {
        failure: ExecutionFailure,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdateMessage {
    pub task_id: TaskId,
    pub run_id: String,
    pub worker_id: String,
    pub update: ExecutionUpdate,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerHeartbeatMessage {
    pub worker_id: String,
    pub hostname: String,
    pub queues: Vec<String>,
    pub current_task_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskControlMessage {
    pub task_id: TaskId,
    /// 为空时取消该任务的任何运行
    pub run_id: Option<String>,
    pub action: TaskControlAction,
    pub requester: String,
    pub timestamp: DateTime<Utc>,
}

/// 编排核心发给单个Worker的指令
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskControlAction {
    Cancel,
    /// 认领已记录，Worker可以开始执行动作
    ClaimAccepted,
    /// 运行已失效，Worker必须放弃且不得执行动作
    ClaimRejected,
}

impl Message {
    fn new(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn task_execution(message: TaskExecutionMessage) -> Self {
        let correlation_id = Some(message.run_id.clone());
        Self {
            correlation_id,
            ..Self::new(MessageType::TaskExecution(message))
        }
    }

    pub fn status_update(message: StatusUpdateMessage) -> Self {
        let correlation_id = Some(message.run_id.clone());
        Self {
            correlation_id,
            ..Self::new(MessageType::StatusUpdate(message))
        }
    }

    pub fn worker_heartbeat(message: WorkerHeartbeatMessage) -> Self {
        Self::new(MessageType::WorkerHeartbeat(message))
    }

    pub fn task_control(message: TaskControlMessage) -> Self {
        Self::new(MessageType::TaskControl(message))
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::TaskExecution(_) => "task_execution",
            MessageType::StatusUpdate(_) => "status_update",
            MessageType::WorkerHeartbeat(_) => "worker_heartbeat",
            MessageType::TaskControl(_) => "task_control",
        }
    }
}

/// 消息代理接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()>;
    /// 取出当前可用的消息，没有消息时返回空列表
    async fn consume_messages(&self, queue: &str) -> OrchestratorResult<Vec<Message>>;
    /// 最多取出 `max` 条消息，未取出的留给其他消费者
    async fn consume_up_to(&self, queue: &str, max: usize) -> OrchestratorResult<Vec<Message>>;
    async fn create_queue(&self, queue: &str, durable: bool) -> OrchestratorResult<()>;
    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32>;
    async fn purge_queue(&self, queue: &str) -> OrchestratorResult<()>;

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionFailure;

    #[test]
    fn status_update_serializes_with_tags() {
        let message = Message::status_update(StatusUpdateMessage {
            task_id: 4,
            run_id: "run-1".into(),
            worker_id: "w1".into(),
            update: ExecutionUpdate::Failed {
                failure: ExecutionFailure::transient("network", "connection reset"),
                duration_ms: 12,
            },
            timestamp: Utc::now(),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["message_type"]["type"], "StatusUpdate");
        assert_eq!(value["message_type"]["update"]["state"], "failed");
        assert_eq!(value["correlation_id"], "run-1");

        let decoded: Message = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.message_type_str(), "status_update");
    }
}
