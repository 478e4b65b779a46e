use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::{Clock, OrchestratorResult};
use orchestrator_domain::lifecycle::ensure_transition;
use orchestrator_domain::{Task, TaskEvent, TaskId, TaskLogEntry, TaskRepository, TaskStatus};
use orchestrator_infrastructure::{EventBus, MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;

const PUBLISH_STRIPES: usize = 64;

/// 版本冲突后重新读取并重试的次数上限
pub const MAX_CAS_RETRIES: usize = 3;

/// 任务状态写入的唯一入口
///
/// 每次迁移先按状态机校验，再以版本号做比较并交换，写入成功后才发布事件。
/// 同一任务的写入与发布在同一把分段锁内完成，保证订阅者看到的顺序与版本顺序一致。
pub struct TaskLifecycle {
    task_repo: Arc<dyn TaskRepository>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    stripes: Vec<Mutex<()>>,
}

impl TaskLifecycle {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            event_bus,
            clock,
            metrics,
            stripes: (0..PUBLISH_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.task_repo
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn stripe(&self, task_id: TaskId) -> &Mutex<()> {
        &self.stripes[task_id.unsigned_abs() as usize % self.stripes.len()]
    }

    /// 迁移到 `to` 并持久化
    ///
    /// `current` 必须是调用方刚读到的记录；版本已变化时返回 `Conflict`，调用方重新读取后再决定。
    pub async fn transition<F>(
        &self,
        current: &Task,
        to: TaskStatus,
        actor_id: Option<&str>,
        mutate: F,
    ) -> OrchestratorResult<Task>
    where
        F: FnOnce(&mut Task) + Send,
    {
        ensure_transition(current, to)?;

        let mut next = current.clone();
        next.status = to;
        next.updated_at = self.clock.now();
        mutate(&mut next);

        let _guard = self.stripe(current.id).lock().await;
        let stored = self.task_repo.update(&next).await?;

        self.metrics
            .record_transition(current.status.as_str(), to.as_str());
        StructuredLogger::log_transition(stored.id, current.status.as_str(), to.as_str(), actor_id);
        self.event_bus.publish(TaskEvent::status_changed(
            stored.id,
            Some(current.status),
            to,
            actor_id,
            stored.updated_at,
        ));
        Ok(stored)
    }

    /// 不改变状态的字段更新，例如调整优先级
    pub async fn update<F>(&self, current: &Task, mutate: F) -> OrchestratorResult<Task>
    where
        F: FnOnce(&mut Task) + Send,
    {
        let mut next = current.clone();
        next.updated_at = self.clock.now();
        mutate(&mut next);
        next.status = current.status;

        let _guard = self.stripe(current.id).lock().await;
        self.task_repo.update(&next).await
    }

    /// 新建任务后发布初始事件
    pub async fn announce_created(&self, task: &Task) {
        let _guard = self.stripe(task.id).lock().await;
        self.event_bus.publish(TaskEvent::status_changed(
            task.id,
            None,
            task.status,
            Some(task.owner_id.as_str()),
            task.created_at,
        ));
    }

    /// 追加日志行，终态任务同样接受
    pub async fn append_log(&self, task_id: TaskId, message: impl Into<String>) -> OrchestratorResult<()> {
        let now = self.clock.now();
        let entries = [TaskLogEntry::new(now, message)];

        let _guard = self.stripe(task_id).lock().await;
        self.task_repo.append_logs(task_id, &entries, now).await?;
        self.event_bus
            .publish(TaskEvent::logs_update(task_id, &entries, now));
        Ok(())
    }

    /// 进度只发布事件并刷新 `updated_at`
    pub async fn report_progress(
        &self,
        task_id: TaskId,
        percent: u8,
        message: Option<&str>,
    ) -> OrchestratorResult<()> {
        let now = self.clock.now();

        let _guard = self.stripe(task_id).lock().await;
        self.task_repo.append_logs(task_id, &[], now).await?;
        self.event_bus
            .publish(TaskEvent::progress(task_id, percent, message, now));
        Ok(())
    }
}
