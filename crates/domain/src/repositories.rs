use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::entities::{ControlAction, NewTask, Task, TaskId, TaskLogEntry, TaskStatus, Worker};

/// Job Store
///
/// 所有状态写入都通过 [`TaskRepository::update`] 完成：按 `version` 比较并交换，
/// 版本不一致返回 [`OrchestratorError::Conflict`]，调用方需要重新读取。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, request: &NewTask, now: DateTime<Utc>) -> OrchestratorResult<Task>;

    /// 读取任务，包含完整日志
    async fn get(&self, id: TaskId) -> OrchestratorResult<Option<Task>>;

    /// 以 `task.version` 为期望版本写入，成功后返回版本加一的新记录
    async fn update(&self, task: &Task) -> OrchestratorResult<Task>;

    /// 追加日志。不修改版本号，终态任务同样接受；非终态任务会刷新 `updated_at`
    async fn append_logs(
        &self,
        id: TaskId,
        entries: &[TaskLogEntry],
        touched_at: DateTime<Utc>,
    ) -> OrchestratorResult<()>;

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> OrchestratorResult<Vec<Task>>;

    /// 按 (status, updated_at) 查找长时间未更新的任务，供恢复流程使用
    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        updated_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>>;

    async fn get_required(&self, id: TaskId) -> OrchestratorResult<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(id))
    }
}

/// Worker Registry 存储
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn get(&self, id: &str) -> OrchestratorResult<Option<Worker>>;
    async fn save(&self, worker: &Worker) -> OrchestratorResult<()>;
    async fn list(&self) -> OrchestratorResult<Vec<Worker>>;
}

/// 控制操作审计存储，只追加
#[async_trait]
pub trait ControlActionRepository: Send + Sync {
    async fn record(&self, action: &ControlAction) -> OrchestratorResult<()>;
    async fn list_for_task(&self, task_id: TaskId) -> OrchestratorResult<Vec<ControlAction>>;
}
