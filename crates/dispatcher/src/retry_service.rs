use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::config::RetryConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    failure_reason, AttemptRef, ExecutionFailure, ExecutionReporter, RetryPolicy, Task,
    TaskFailure, TaskId, TaskStatus,
};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, info, instrument, warn};

use crate::lifecycle::{TaskLifecycle, MAX_CAS_RETRIES};

/// 按任务类型查找重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicyRegistry {
    default_policy: RetryPolicy,
    policies: HashMap<String, RetryPolicy>,
    jitter_factor: f64,
}

impl RetryPolicyRegistry {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            default_policy: RetryPolicy::from(&config.default_policy),
            policies: config
                .policies
                .iter()
                .map(|(kind, policy)| (kind.clone(), RetryPolicy::from(policy)))
                .collect(),
            jitter_factor: config.jitter_factor,
        }
    }

    pub fn policy_for(&self, kind: &str) -> &RetryPolicy {
        self.policies.get(kind).unwrap_or(&self.default_policy)
    }

    /// 第 `attempt_count` 次失败后的等待时间，抖动系数为 0 时与公式完全一致
    pub fn backoff(&self, policy: &RetryPolicy, attempt_count: u32) -> Duration {
        let delay = policy.delay_for(attempt_count);
        if self.jitter_factor <= 0.0 {
            return delay;
        }

        let jitter = self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let secs = (delay.as_secs_f64() * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(secs)
    }
}

pub(crate) fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(now)
}

/// 失败后的去向
#[derive(Debug, Clone, PartialEq)]
enum FailureDecision {
    Retry { delay: Duration },
    Fail { reason: &'static str },
}

/// 把执行器的回报落到任务状态上
///
/// 所有回报都必须携带与任务记录一致的 `run_id`，否则视为过期运行直接忽略，
/// 从而保证被取消、暂停或重新提交的旧运行不会覆盖新状态。
pub struct AttemptCoordinator {
    lifecycle: Arc<TaskLifecycle>,
    policies: Arc<RetryPolicyRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl AttemptCoordinator {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        policies: Arc<RetryPolicyRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            lifecycle,
            policies,
            metrics,
        }
    }

    /// 读取仍属于本次运行的任务；运行已失效时返回 None
    async fn current_run(
        &self,
        attempt: &AttemptRef,
        expected: TaskStatus,
    ) -> OrchestratorResult<Option<Task>> {
        let Some(task) = self.lifecycle.repository().get(attempt.task_id).await? else {
            warn!(task.id = attempt.task_id, "回报的任务不存在");
            return Ok(None);
        };

        if task.run_id.as_deref() != Some(attempt.run_id.as_str()) {
            StructuredLogger::log_transition_lost(task.id, expected.as_str(), "运行标识已失效");
            return Ok(None);
        }
        if task.status != expected {
            StructuredLogger::log_transition_lost(task.id, expected.as_str(), task.status.as_str());
            return Ok(None);
        }
        Ok(Some(task))
    }

    fn decide(&self, task: &Task, failure: &ExecutionFailure) -> FailureDecision {
        let policy = self.policies.policy_for(&task.kind);

        if !failure.is_transient() {
            return FailureDecision::Fail {
                reason: failure_reason::PERMANENT_ERROR,
            };
        }
        if !policy.is_retryable_kind(&failure.kind) {
            return FailureDecision::Fail {
                reason: failure_reason::NON_RETRYABLE_KIND,
            };
        }
        // 任务自带的上限与该类型策略的上限取较小者
        if task.attempt_count + 1 >= task.max_attempts.min(policy.max_retries) {
            return FailureDecision::Fail {
                reason: failure_reason::RETRIES_EXHAUSTED,
            };
        }

        FailureDecision::Retry {
            delay: self.policies.backoff(policy, task.attempt_count),
        }
    }

    async fn append_log_quietly(&self, task_id: TaskId, message: String) {
        if let Err(e) = self.lifecycle.append_log(task_id, message).await {
            warn!(task.id = task_id, error = %e, "追加任务日志失败");
        }
    }
}

#[async_trait]
impl ExecutionReporter for AttemptCoordinator {
    #[instrument(skip(self), fields(task.id = attempt.task_id, run.id = %attempt.run_id))]
    async fn on_claimed(&self, attempt: &AttemptRef) -> OrchestratorResult<Option<Task>> {
        for _ in 0..MAX_CAS_RETRIES {
            let Some(task) = self.current_run(attempt, TaskStatus::Queued).await? else {
                return Ok(None);
            };

            let now = self.lifecycle.now();
            let worker_id = attempt.worker_id.clone();
            match self
                .lifecycle
                .transition(&task, TaskStatus::Running, attempt.worker_id.as_deref(), move |t| {
                    t.started_at.get_or_insert(now);
                    t.worker_id = worker_id;
                })
                .await
            {
                Ok(running) => {
                    debug!(task.id = running.id, backend = %attempt.backend, "任务已被执行器认领");
                    return Ok(Some(running));
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }

        warn!(task.id = attempt.task_id, "多次版本冲突，放弃本次认领");
        Ok(None)
    }

    async fn on_log(&self, task_id: TaskId, message: String) -> OrchestratorResult<()> {
        self.lifecycle.append_log(task_id, message).await
    }

    async fn on_progress(
        &self,
        task_id: TaskId,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<()> {
        self.lifecycle
            .report_progress(task_id, percent, message.as_deref())
            .await
    }

    #[instrument(skip(self, output), fields(task.id = attempt.task_id, run.id = %attempt.run_id))]
    async fn on_succeeded(
        &self,
        attempt: &AttemptRef,
        output: Option<String>,
        duration_ms: u64,
    ) -> OrchestratorResult<Option<Task>> {
        for _ in 0..MAX_CAS_RETRIES {
            let Some(task) = self.current_run(attempt, TaskStatus::Running).await? else {
                return Ok(None);
            };

            match self
                .lifecycle
                .transition(&task, TaskStatus::Succeeded, None, |t| {
                    t.attempt_count += 1;
                    t.next_attempt_at = None;
                })
                .await
            {
                Ok(done) => {
                    self.metrics
                        .record_attempt(&done.kind, "succeeded", duration_ms);
                    let line = match output {
                        Some(output) => format!("第 {} 次尝试成功: {output}", done.attempt_count),
                        None => format!("第 {} 次尝试成功", done.attempt_count),
                    };
                    self.append_log_quietly(done.id, line).await;
                    info!(task.id = done.id, attempts = done.attempt_count, "任务执行成功");
                    return Ok(Some(done));
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }

        warn!(task.id = attempt.task_id, "多次版本冲突，成功回报未能写入");
        Ok(None)
    }

    #[instrument(skip(self), fields(task.id = attempt.task_id, run.id = %attempt.run_id))]
    async fn on_failed(
        &self,
        attempt: &AttemptRef,
        failure: ExecutionFailure,
        duration_ms: u64,
    ) -> OrchestratorResult<Option<Task>> {
        for _ in 0..MAX_CAS_RETRIES {
            let Some(task) = self.current_run(attempt, TaskStatus::Running).await? else {
                return Ok(None);
            };

            let now = self.lifecycle.now();
            let attempts = task.attempt_count + 1;
            let decision = self.decide(&task, &failure);

            let result = match &decision {
                FailureDecision::Retry { delay } => {
                    let next_attempt_at = deadline_after(now, *delay);
                    let last_error = TaskFailure {
                        reason: failure_reason::ATTEMPT_FAILED.to_string(),
                        error_kind: Some(failure.kind.clone()),
                        message: failure.message.clone(),
                        attempts,
                        occurred_at: now,
                    };
                    self.lifecycle
                        .transition(&task, TaskStatus::Queued, None, move |t| {
                            t.attempt_count = attempts;
                            t.release_submission();
                            t.next_attempt_at = Some(next_attempt_at);
                            t.last_error = Some(last_error);
                        })
                        .await
                }
                FailureDecision::Fail { reason } => {
                    let last_error = TaskFailure {
                        reason: reason.to_string(),
                        error_kind: Some(failure.kind.clone()),
                        message: failure.message.clone(),
                        attempts,
                        occurred_at: now,
                    };
                    self.lifecycle
                        .transition(&task, TaskStatus::Failed, None, move |t| {
                            t.attempt_count = attempts;
                            t.next_attempt_at = None;
                            t.last_error = Some(last_error);
                        })
                        .await
                }
            };

            let updated = match result {
                Ok(updated) => updated,
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            };

            self.metrics.record_attempt(&updated.kind, "failed", duration_ms);
            match decision {
                FailureDecision::Retry { delay } => {
                    self.metrics
                        .record_retry_scheduled(&updated.kind, delay.as_secs_f64());
                    StructuredLogger::log_retry_scheduled(
                        updated.id,
                        updated.attempt_count,
                        updated.max_attempts,
                        delay.as_secs_f64(),
                        &failure.to_string(),
                    );
                    self.append_log_quietly(
                        updated.id,
                        format!(
                            "第 {attempts} 次尝试失败: {failure}，{:.1} 秒后重试",
                            delay.as_secs_f64()
                        ),
                    )
                    .await;
                }
                FailureDecision::Fail { reason } => {
                    self.metrics.record_task_failed(&updated.kind, reason);
                    StructuredLogger::log_task_failed(
                        updated.id,
                        reason,
                        attempts,
                        &failure.to_string(),
                    );
                    self.append_log_quietly(
                        updated.id,
                        format!("第 {attempts} 次尝试失败: {failure}，任务终止({reason})"),
                    )
                    .await;
                }
            }
            return Ok(Some(updated));
        }

        warn!(task.id = attempt.task_id, "多次版本冲突，失败回报未能写入");
        Ok(None)
    }
}
