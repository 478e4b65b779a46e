use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use orchestrator_core::config::RecoveryConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    failure_reason, ExecutionHandle, Task, TaskFailure, TaskStatus,
};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::lifecycle::TaskLifecycle;
use crate::supervisor::BackendSupervisor;

/// 恢复扫描的触发来源，写入任务日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    Startup,
    Periodic,
}

impl RecoverySource {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoverySource::Startup => "startup",
            RecoverySource::Periodic => "periodic",
        }
    }
}

impl fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Retried,
    Failed,
    Skipped,
}

/// 卡住任务的恢复
///
/// 超过 `timeout` 未更新的 Queued/Running 任务直接失败，积压中的任务也一样；
/// 超过较短的 `stale` 阈值的在途任务重新提交到当前后端，积压中的任务计为跳过。
pub struct RecoveryService {
    lifecycle: Arc<TaskLifecycle>,
    supervisor: Arc<BackendSupervisor>,
    metrics: Arc<MetricsCollector>,
    config: RecoveryConfig,
}

impl RecoveryService {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        supervisor: Arc<BackendSupervisor>,
        metrics: Arc<MetricsCollector>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            lifecycle,
            supervisor,
            metrics,
            config,
        }
    }

    pub async fn recover_on_startup(&self) -> OrchestratorResult<RecoveryReport> {
        self.run_pass(
            Duration::seconds(self.config.startup_stale_seconds as i64),
            RecoverySource::Startup,
        )
        .await
    }

    pub async fn recover_periodic(&self) -> OrchestratorResult<RecoveryReport> {
        self.run_pass(
            Duration::seconds(self.config.stale_seconds as i64),
            RecoverySource::Periodic,
        )
        .await
    }

    /// 执行一次扫描。`stale` 为 0 时所有在途任务都被视为卡住
    #[instrument(skip(self), fields(source = %source))]
    pub async fn run_pass(
        &self,
        stale: Duration,
        source: RecoverySource,
    ) -> OrchestratorResult<RecoveryReport> {
        let now = self.lifecycle.now();
        let statuses = [TaskStatus::Queued, TaskStatus::Running];
        let candidates = if stale <= Duration::zero() {
            self.lifecycle.repository().list_by_status(&statuses).await?
        } else {
            self.lifecycle
                .repository()
                .find_stale(&statuses, now - stale)
                .await?
        };
        let timeout_cutoff = now - Duration::seconds(self.config.timeout_seconds as i64);

        let mut report = RecoveryReport::default();
        for task in candidates {
            let result = if task.updated_at < timeout_cutoff {
                self.fail_timed_out(&task).await
            } else if !task.is_in_flight() {
                Ok(Outcome::Skipped)
            } else {
                self.resubmit(&task, source).await
            };

            match result {
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) if e.is_conflict() => {
                    debug!(task.id = task.id, "恢复时任务已被其他参与者修改");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(task.id = task.id, error = %e, "恢复任务失败");
                    report.errors += 1;
                }
            }
        }

        StructuredLogger::log_recovery_pass(
            source.as_str(),
            report.retried,
            report.failed,
            report.skipped,
            report.errors,
        );
        self.metrics.record_recovery_pass(
            report.retried,
            report.failed,
            report.skipped,
            report.errors,
        );
        Ok(report)
    }

    async fn fail_timed_out(&self, task: &Task) -> OrchestratorResult<Outcome> {
        let message = format!("超过 {} 秒没有任何更新", self.config.timeout_seconds);
        self.fail(task, failure_reason::RECOVERY_TIMEOUT, message, task.attempt_count)
            .await
    }

    async fn fail(
        &self,
        task: &Task,
        reason: &'static str,
        message: String,
        attempts: u32,
    ) -> OrchestratorResult<Outcome> {
        let handle = ExecutionHandle::for_task(task);
        let last_error = TaskFailure {
            reason: reason.to_string(),
            error_kind: None,
            message: message.clone(),
            attempts,
            occurred_at: self.lifecycle.now(),
        };

        let failed = self
            .lifecycle
            .transition(task, TaskStatus::Failed, None, move |t| {
                t.attempt_count = attempts;
                t.next_attempt_at = None;
                t.last_error = Some(last_error);
            })
            .await?;

        if let Some(handle) = handle {
            self.supervisor.cancel(&handle).await;
        }
        self.metrics.record_task_failed(&failed.kind, reason);
        StructuredLogger::log_task_failed(failed.id, reason, attempts, &message);
        self.append_log(failed.id, format!("恢复流程将任务标记为失败({reason}): {message}"))
            .await;
        Ok(Outcome::Failed)
    }

    async fn resubmit(&self, task: &Task, source: RecoverySource) -> OrchestratorResult<Outcome> {
        let attempts = task.attempt_count + 1;
        if attempts >= task.max_attempts {
            let message = format!("恢复重试后已达到最大尝试次数 {}", task.max_attempts);
            return self
                .fail(task, failure_reason::RECOVERY_RETRIES_EXHAUSTED, message, attempts)
                .await;
        }

        let old_handle = ExecutionHandle::for_task(task);
        let backend = match self.supervisor.select().await {
            Ok(backend) => Some(backend),
            Err(OrchestratorError::BackendUnavailable(_)) => None,
            Err(e) => return Err(e),
        };

        let Some(backend) = backend else {
            self.lifecycle
                .transition(task, TaskStatus::Queued, None, move |t| {
                    t.attempt_count = attempts;
                    t.release_submission();
                })
                .await?;
            if let Some(handle) = old_handle {
                self.supervisor.cancel(&handle).await;
            }
            self.append_log(
                task.id,
                format!("{source} 恢复: 没有可用的执行后端，任务退回积压队列(第 {attempts} 次尝试已结束)"),
            )
            .await;
            return Ok(Outcome::Retried);
        };

        let kind = backend.kind();
        let queued = self
            .lifecycle
            .transition(task, TaskStatus::Queued, None, move |t| {
                t.attempt_count = attempts;
                t.assign_submission(kind);
            })
            .await?;

        if let Some(handle) = old_handle {
            self.supervisor.cancel(&handle).await;
        }
        self.append_log(
            queued.id,
            format!("{source} 恢复: 重新提交到 {kind} 后端(第 {attempts} 次尝试已结束)"),
        )
        .await;

        if let Err(e) = backend.submit(&queued).await {
            self.metrics.record_submission(kind.as_str(), false);
            warn!(task.id = queued.id, error = %e, "恢复时重新提交失败，任务退回积压队列");
            self.lifecycle
                .transition(&queued, TaskStatus::Queued, None, |t| t.release_submission())
                .await?;
        } else {
            self.metrics.record_submission(kind.as_str(), true);
        }
        Ok(Outcome::Retried)
    }

    async fn append_log(&self, task_id: i64, message: String) {
        if let Err(e) = self.lifecycle.append_log(task_id, message).await {
            warn!(task.id = task_id, error = %e, "追加恢复日志失败");
        }
    }

    /// 周期扫描，启动时的扫描由调用方单独执行
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = StdDuration::from_secs(self.config.interval_seconds);
        info!(interval_secs = self.config.interval_seconds, "恢复服务已启动");
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_periodic().await {
                        error!(error = %e, "周期恢复扫描失败");
                    }
                }
            }
        }
        info!("恢复服务已停止");
    }
}
