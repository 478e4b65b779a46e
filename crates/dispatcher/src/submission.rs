use std::sync::Arc;

use orchestrator_core::config::SchedulerConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{NewTask, Task, TaskPriority};
use orchestrator_infrastructure::{RateLimiter, StructuredLogger};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::lifecycle::TaskLifecycle;
use crate::retry_service::RetryPolicyRegistry;

/// 上游业务提交的任务请求，未填写的字段按配置补齐
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    pub owner_id: String,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl TaskSubmission {
    pub fn new(kind: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::Value::Null,
            queue: None,
            priority: None,
            owner_id: owner_id.into(),
            max_attempts: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// 任务创建入口
pub struct SubmissionService {
    lifecycle: Arc<TaskLifecycle>,
    policies: Arc<RetryPolicyRegistry>,
    rate_limiter: Arc<RateLimiter>,
    default_queue: String,
}

impl SubmissionService {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        policies: Arc<RetryPolicyRegistry>,
        rate_limiter: Arc<RateLimiter>,
        scheduler_config: &SchedulerConfig,
    ) -> Self {
        Self {
            lifecycle,
            policies,
            rate_limiter,
            default_queue: scheduler_config.default_queue.clone(),
        }
    }

    /// 创建一条 Pending 任务并发布初始事件
    #[instrument(skip(self, submission), fields(task.kind = %submission.kind, owner.id = %submission.owner_id))]
    pub async fn submit(&self, submission: TaskSubmission) -> OrchestratorResult<Task> {
        self.rate_limiter.check(&submission.owner_id).await?;

        // 调用方只能收紧该类型策略的重试上限
        let policy_cap = self.policies.policy_for(&submission.kind).max_retries;
        let max_attempts = submission
            .max_attempts
            .map_or(policy_cap, |requested| requested.min(policy_cap));
        let request = NewTask {
            queue: submission
                .queue
                .unwrap_or_else(|| self.default_queue.clone()),
            priority: submission.priority.unwrap_or_default(),
            kind: submission.kind,
            payload: submission.payload,
            owner_id: submission.owner_id,
            max_attempts,
        };
        request.validate()?;

        let task = self
            .lifecycle
            .repository()
            .create(&request, self.lifecycle.now())
            .await?;

        StructuredLogger::log_task_created(task.id, &task.kind, &task.queue, &task.owner_id);
        self.lifecycle.announce_created(&task).await;
        Ok(task)
    }
}
