use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    ControlAction, ControlActionRepository, NewTask, Task, TaskId, TaskLogEntry, TaskRepository,
    TaskStatus, Worker, WorkerRepository,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct TaskTable {
    next_id: TaskId,
    tasks: HashMap<TaskId, Task>,
    logs: HashMap<TaskId, Vec<TaskLogEntry>>,
}

impl TaskTable {
    fn with_logs(&self, task: &Task) -> Task {
        let mut task = task.clone();
        task.logs = self.logs.get(&task.id).cloned().unwrap_or_default();
        task
    }
}

/// 内存任务存储，与SQLite实现保持相同的乐观锁语义
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    table: RwLock<TaskTable>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按状态过滤并按 id 排序，不带日志
    async fn select(&self, predicate: impl Fn(&Task) -> bool) -> Vec<Task> {
        let table = self.table.read().await;
        let mut tasks: Vec<Task> = table
            .tasks
            .values()
            .filter(|task| predicate(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, request: &NewTask, now: DateTime<Utc>) -> OrchestratorResult<Task> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let task = request.clone().into_task(table.next_id, now);
        table.tasks.insert(task.id, task.clone());
        debug!("创建任务: {} ({})", task.id, task.kind);
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> OrchestratorResult<Option<Task>> {
        let table = self.table.read().await;
        Ok(table.tasks.get(&id).map(|task| table.with_logs(task)))
    }

    async fn update(&self, task: &Task) -> OrchestratorResult<Task> {
        let mut table = self.table.write().await;
        let current = table
            .tasks
            .get(&task.id)
            .ok_or_else(|| OrchestratorError::task_not_found(task.id))?;

        if current.version != task.version {
            return Err(OrchestratorError::conflict(task.id, task.version));
        }

        let mut stored = task.clone();
        stored.version += 1;
        stored.logs.clear();
        table.tasks.insert(stored.id, stored.clone());
        Ok(table.with_logs(&stored))
    }

    async fn append_logs(
        &self,
        id: TaskId,
        entries: &[TaskLogEntry],
        touched_at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let mut table = self.table.write().await;
        let task = table
            .tasks
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::task_not_found(id))?;

        if !task.is_terminal() && task.updated_at < touched_at {
            task.updated_at = touched_at;
        }
        table
            .logs
            .entry(id)
            .or_default()
            .extend(entries.iter().cloned());
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> OrchestratorResult<Vec<Task>> {
        Ok(self.select(|task| statuses.contains(&task.status)).await)
    }

    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        updated_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>> {
        Ok(self
            .select(|task| statuses.contains(&task.status) && task.updated_at < updated_before)
            .await)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWorkerRepository {
    workers: RwLock<HashMap<String, Worker>>,
}

impl InMemoryWorkerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn get(&self, id: &str) -> OrchestratorResult<Option<Worker>> {
        Ok(self.workers.read().await.get(id).cloned())
    }

    async fn save(&self, worker: &Worker) -> OrchestratorResult<()> {
        self.workers
            .write()
            .await
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryControlActionRepository {
    actions: RwLock<Vec<ControlAction>>,
}

impl InMemoryControlActionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlActionRepository for InMemoryControlActionRepository {
    async fn record(&self, action: &ControlAction) -> OrchestratorResult<()> {
        self.actions.write().await.push(action.clone());
        Ok(())
    }

    async fn list_for_task(&self, task_id: TaskId) -> OrchestratorResult<Vec<ControlAction>> {
        Ok(self
            .actions
            .read()
            .await
            .iter()
            .filter(|action| action.task_id == task_id)
            .cloned()
            .collect())
    }
}
