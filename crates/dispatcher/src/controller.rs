use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    ControlAction, ControlActionKind, ControlActionRepository, ControlOutcome, ExecutionHandle,
    Task, TaskId, TaskPriority, TaskStatus,
};
use orchestrator_infrastructure::{MetricsCollector, RateLimiter, StructuredLogger};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use crate::lifecycle::{TaskLifecycle, MAX_CAS_RETRIES};
use crate::supervisor::BackendSupervisor;

const AUDIT_WRITE_ATTEMPTS: u32 = 3;

/// 批量操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkOperation {
    Pause,
    Resume,
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
    Retry,
    Reprioritize {
        priority: TaskPriority,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub task_id: TaskId,
    pub code: String,
    pub message: String,
}

/// 逐个任务独立生效，部分成功也会返回
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Status(TaskStatus),
    Priority(TaskPriority),
}

fn prepare(action: ControlActionKind, task: &mut Task) {
    match action {
        ControlActionKind::Pause => task.release_submission(),
        ControlActionKind::Retry => {
            task.release_submission();
            task.next_attempt_at = None;
        }
        ControlActionKind::Resume | ControlActionKind::Cancel => task.next_attempt_at = None,
        ControlActionKind::Reprioritize => {}
    }
}

/// 控制操作
///
/// 每次生效的迁移写一条 `Applied` 审计；终态任务上的操作返回 `InvalidState` 并写一条 `Rejected` 审计。
/// 并发操作同一任务时只有一个能通过版本检查，其余重新读取后按新状态处理。
pub struct TaskController {
    lifecycle: Arc<TaskLifecycle>,
    audit: Arc<dyn ControlActionRepository>,
    supervisor: Arc<BackendSupervisor>,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
}

impl TaskController {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        audit: Arc<dyn ControlActionRepository>,
        supervisor: Arc<BackendSupervisor>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            lifecycle,
            audit,
            supervisor,
            rate_limiter,
            metrics,
        }
    }

    pub async fn pause(&self, task_id: TaskId, actor_id: &str) -> OrchestratorResult<Task> {
        self.rate_limiter.check(actor_id).await?;
        self.apply(ControlActionKind::Pause, task_id, actor_id, None).await
    }

    pub async fn resume(&self, task_id: TaskId, actor_id: &str) -> OrchestratorResult<Task> {
        self.rate_limiter.check(actor_id).await?;
        self.apply(ControlActionKind::Resume, task_id, actor_id, None).await
    }

    pub async fn cancel(
        &self,
        task_id: TaskId,
        actor_id: &str,
        reason: Option<String>,
    ) -> OrchestratorResult<Task> {
        self.rate_limiter.check(actor_id).await?;
        self.apply(ControlActionKind::Cancel, task_id, actor_id, reason)
            .await
    }

    /// 立即重新进入积压队列，清除退避等待，不增加尝试次数
    pub async fn retry(&self, task_id: TaskId, actor_id: &str) -> OrchestratorResult<Task> {
        self.rate_limiter.check(actor_id).await?;
        self.apply(ControlActionKind::Retry, task_id, actor_id, None).await
    }

    pub async fn reprioritize(
        &self,
        task_id: TaskId,
        actor_id: &str,
        priority: TaskPriority,
    ) -> OrchestratorResult<Task> {
        self.rate_limiter.check(actor_id).await?;
        self.execute(
            ControlActionKind::Reprioritize,
            Change::Priority(priority),
            task_id,
            actor_id,
            None,
        )
        .await
    }

    /// 批量操作只计一次限流
    pub async fn bulk(
        &self,
        operation: BulkOperation,
        task_ids: &[TaskId],
        actor_id: &str,
    ) -> OrchestratorResult<BulkResult> {
        self.rate_limiter.check(actor_id).await?;

        let mut result = BulkResult::default();
        for &task_id in task_ids {
            let outcome = match &operation {
                BulkOperation::Pause => {
                    self.apply(ControlActionKind::Pause, task_id, actor_id, None)
                        .await
                }
                BulkOperation::Resume => {
                    self.apply(ControlActionKind::Resume, task_id, actor_id, None)
                        .await
                }
                BulkOperation::Cancel { reason } => {
                    self.apply(ControlActionKind::Cancel, task_id, actor_id, reason.clone())
                        .await
                }
                BulkOperation::Retry => {
                    self.apply(ControlActionKind::Retry, task_id, actor_id, None)
                        .await
                }
                BulkOperation::Reprioritize { priority } => {
                    self.execute(
                        ControlActionKind::Reprioritize,
                        Change::Priority(*priority),
                        task_id,
                        actor_id,
                        None,
                    )
                    .await
                }
            };

            match outcome {
                Ok(_) => result.succeeded.push(task_id),
                Err(e) => result.failed.push(BulkFailure {
                    task_id,
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(result)
    }

    pub async fn get_task(&self, task_id: TaskId) -> OrchestratorResult<Task> {
        self.lifecycle.repository().get_required(task_id).await
    }

    pub async fn audit_trail(&self, task_id: TaskId) -> OrchestratorResult<Vec<ControlAction>> {
        self.lifecycle.repository().get_required(task_id).await?;
        self.audit.list_for_task(task_id).await
    }

    async fn apply(
        &self,
        action: ControlActionKind,
        task_id: TaskId,
        actor_id: &str,
        reason: Option<String>,
    ) -> OrchestratorResult<Task> {
        let to = match action {
            ControlActionKind::Pause => TaskStatus::Paused,
            ControlActionKind::Cancel => TaskStatus::Cancelled,
            ControlActionKind::Resume | ControlActionKind::Retry => TaskStatus::Queued,
            ControlActionKind::Reprioritize => {
                return Err(OrchestratorError::invalid_params("调整优先级需要指定新的优先级"))
            }
        };
        self.execute(action, Change::Status(to), task_id, actor_id, reason)
            .await
    }

    #[instrument(skip(self, change, reason), fields(task.id = task_id, actor.id = actor_id, action = %action))]
    async fn execute(
        &self,
        action: ControlActionKind,
        change: Change,
        task_id: TaskId,
        actor_id: &str,
        reason: Option<String>,
    ) -> OrchestratorResult<Task> {
        let mut last_version = 0;

        for _ in 0..MAX_CAS_RETRIES {
            let task = self.lifecycle.repository().get_required(task_id).await?;
            last_version = task.version;

            if task.is_terminal() {
                let err = OrchestratorError::invalid_state(task.id, task.status);
                self.reject(&task, action, actor_id, reason.clone(), &err)
                    .await?;
                return Err(err);
            }

            let result = match change {
                Change::Status(to) => {
                    if action == ControlActionKind::Resume && task.status != TaskStatus::Paused {
                        Err(OrchestratorError::invalid_transition(task.id, task.status, to))
                    } else {
                        self.lifecycle
                            .transition(&task, to, Some(actor_id), move |t| prepare(action, t))
                            .await
                    }
                }
                Change::Priority(priority) => {
                    self.lifecycle
                        .update(&task, move |t| t.priority = priority)
                        .await
                }
            };

            let updated = match result {
                Ok(updated) => updated,
                Err(e) if e.is_conflict() => continue,
                Err(e @ OrchestratorError::InvalidTransition { .. }) => {
                    self.reject(&task, action, actor_id, reason.clone(), &e)
                        .await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let detail = match change {
                Change::Status(to) => format!("{} -> {}", task.status, to),
                Change::Priority(priority) => format!("{} -> {}", task.priority, priority),
            };
            let record = ControlAction::new(
                task.id,
                action,
                actor_id,
                self.lifecycle.now(),
                ControlOutcome::Applied,
            )
            .with_reason(reason)
            .with_detail(detail);
            self.record_applied(&record).await;

            self.metrics
                .record_control_action(action.as_str(), ControlOutcome::Applied.as_str());
            StructuredLogger::log_control_action(
                task.id,
                action.as_str(),
                actor_id,
                ControlOutcome::Applied.as_str(),
            );

            let stops_run = matches!(
                action,
                ControlActionKind::Pause | ControlActionKind::Cancel | ControlActionKind::Retry
            );
            if stops_run && task.is_in_flight() {
                if let Some(handle) = ExecutionHandle::for_task(&task) {
                    self.supervisor.cancel(&handle).await;
                }
            }
            return Ok(updated);
        }

        warn!(task.id = task_id, "控制操作多次版本冲突");
        Err(OrchestratorError::conflict(task_id, last_version))
    }

    /// 迁移已经提交，审计写入失败时重试，最终失败只记录错误而不改变操作结果
    async fn record_applied(&self, record: &ControlAction) {
        for attempt in 1..=AUDIT_WRITE_ATTEMPTS {
            match self.audit.record(record).await {
                Ok(()) => return,
                Err(e) if attempt < AUDIT_WRITE_ATTEMPTS => {
                    warn!(task.id = record.task_id, attempt, error = %e, "写入审计记录失败，稍后重试");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    self.metrics.record_audit_write_failure(record.action.as_str());
                    error!(
                        task.id = record.task_id,
                        action = %record.action,
                        actor.id = %record.actor_id,
                        error = %e,
                        "审计记录写入失败，状态变更已生效"
                    );
                }
            }
        }
    }

    async fn reject(
        &self,
        task: &Task,
        action: ControlActionKind,
        actor_id: &str,
        reason: Option<String>,
        err: &OrchestratorError,
    ) -> OrchestratorResult<()> {
        let record = ControlAction::new(
            task.id,
            action,
            actor_id,
            self.lifecycle.now(),
            ControlOutcome::Rejected,
        )
        .with_reason(reason)
        .with_detail(err.to_string());
        self.audit.record(&record).await?;

        self.metrics
            .record_control_action(action.as_str(), ControlOutcome::Rejected.as_str());
        StructuredLogger::log_control_action(
            task.id,
            action.as_str(),
            actor_id,
            ControlOutcome::Rejected.as_str(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_operation_wire_shape() {
        let op: BulkOperation =
            serde_json::from_value(serde_json::json!({"action": "reprioritize", "priority": "high"}))
                .unwrap();
        assert_eq!(
            op,
            BulkOperation::Reprioritize {
                priority: TaskPriority::High
            }
        );

        let op: BulkOperation =
            serde_json::from_value(serde_json::json!({"action": "cancel"})).unwrap();
        assert_eq!(op, BulkOperation::Cancel { reason: None });
    }

    #[test]
    fn retry_clears_submission_and_backoff() {
        let now = chrono::Utc::now();
        let mut task = orchestrator_domain::NewTask {
            kind: "deploy".into(),
            payload: serde_json::Value::Null,
            queue: "default".into(),
            priority: TaskPriority::Normal,
            owner_id: "alice".into(),
            max_attempts: 3,
        }
        .into_task(1, now);
        task.assign_submission(orchestrator_domain::BackendKind::Local);
        task.next_attempt_at = Some(now);

        prepare(ControlActionKind::Retry, &mut task);
        assert!(task.backend.is_none());
        assert!(task.run_id.is_none());
        assert!(task.next_attempt_at.is_none());
    }
}
