//! 测试数据构造器

use chrono::{DateTime, Utc};
use orchestrator_domain::{NewTask, Task, TaskPriority, Worker};

/// 构造任务创建请求
pub struct NewTaskBuilder {
    request: NewTask,
}

impl NewTaskBuilder {
    pub fn new() -> Self {
        Self {
            request: NewTask {
                kind: "deploy".to_string(),
                payload: serde_json::json!({"app": "web"}),
                queue: "default".to_string(),
                priority: TaskPriority::Normal,
                owner_id: "alice".to_string(),
                max_attempts: 3,
            },
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.request.kind = kind.to_string();
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.request.queue = queue.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.request.max_attempts = max_attempts;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.request.payload = payload;
        self
    }

    pub fn build(self) -> NewTask {
        self.request
    }
}

impl Default for NewTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 直接构造任务记录，不经过存储层
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: NewTaskBuilder::new().build().into_task(1, Utc::now()),
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.task.kind = kind.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.task.queue = queue.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self.task.updated_at = at;
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.updated_at = at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构造在线Worker记录
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            worker: Worker::new(id, format!("{id}.local"), Utc::now()),
        }
    }

    pub fn with_queues(mut self, queues: &[&str]) -> Self {
        self.worker.queues = queues.iter().map(|q| q.to_string()).collect();
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}
