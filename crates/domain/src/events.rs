use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::entities::{TaskId, TaskLogEntry, TaskStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    StatusChanged,
    LogsUpdate,
    Progress,
}

/// 推送给订阅者的任务事件
///
/// 序列化形状: `{"type": "status_changed", "task_id": 1, "data": {...}, "timestamp": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub event_type: TaskEventType,
    pub task_id: TaskId,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn status_changed(
        task_id: TaskId,
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
        actor_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: TaskEventType::StatusChanged,
            task_id,
            data: json!({
                "old_status": old_status,
                "new_status": new_status,
                "actor_id": actor_id,
            }),
            timestamp,
        }
    }

    pub fn logs_update(task_id: TaskId, entries: &[TaskLogEntry], timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: TaskEventType::LogsUpdate,
            task_id,
            data: json!({
                "logs_delta": entries,
                "append": true,
            }),
            timestamp,
        }
    }

    pub fn progress(
        task_id: TaskId,
        percent: u8,
        message: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: TaskEventType::Progress,
            task_id,
            data: json!({
                "percent": percent.min(100),
                "message": message,
            }),
            timestamp,
        }
    }

    /// status_changed 事件中的新状态
    pub fn new_status(&self) -> Option<TaskStatus> {
        if self.event_type != TaskEventType::StatusChanged {
            return None;
        }
        self.data
            .get("new_status")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// 订阅过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Task(TaskId),
}

impl EventFilter {
    pub fn matches(&self, event: &TaskEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Task(id) => event.task_id == *id,
        }
    }
}
