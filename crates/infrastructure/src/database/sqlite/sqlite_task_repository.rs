use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    BackendKind, NewTask, Task, TaskFailure, TaskId, TaskLogEntry, TaskPriority, TaskRepository,
    TaskStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, kind, payload, status, priority, queue, attempt_count, max_attempts, \
     version, owner_id, backend, run_id, worker_id, next_attempt_at, last_error, created_at, \
     started_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> OrchestratorResult<Task> {
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        let priority: i32 = row.try_get("priority")?;
        let backend: Option<String> = row.try_get("backend")?;
        let last_error: Option<String> = row.try_get("last_error")?;
        let attempt_count: i64 = row.try_get("attempt_count")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;

        Ok(Task {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            payload: serde_json::from_str(&payload)?,
            status: status.parse()?,
            priority: TaskPriority::from_i32(priority).ok_or_else(|| {
                OrchestratorError::Serialization(format!("未知的优先级数值: {priority}"))
            })?,
            queue: row.try_get("queue")?,
            attempt_count: u32::try_from(attempt_count).unwrap_or_default(),
            max_attempts: u32::try_from(max_attempts).unwrap_or_default(),
            version: row.try_get("version")?,
            owner_id: row.try_get("owner_id")?,
            backend: backend.map(|b| b.parse::<BackendKind>()).transpose()?,
            run_id: row.try_get("run_id")?,
            worker_id: row.try_get("worker_id")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            last_error: last_error
                .map(|raw| serde_json::from_str::<TaskFailure>(&raw))
                .transpose()?,
            logs: Vec::new(),
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn load_logs(&self, id: TaskId) -> OrchestratorResult<Vec<TaskLogEntry>> {
        let rows = sqlx::query(
            "SELECT timestamp, message FROM task_logs WHERE task_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskLogEntry {
                    timestamp: row.try_get("timestamp")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }

    async fn select_by_status(
        &self,
        statuses: &[TaskStatus],
        updated_before: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ("));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
        if let Some(before) = updated_before {
            builder.push(" AND updated_at < ").push_bind(before);
        }
        builder.push(" ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, request), fields(task.kind = %request.kind, task.queue = %request.queue))]
    async fn create(&self, request: &NewTask, now: DateTime<Utc>) -> OrchestratorResult<Task> {
        let payload = serde_json::to_string(&request.payload)?;

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (kind, payload, status, priority, queue, attempt_count, max_attempts,
                               version, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, 1, $7, $8, $8)
            RETURNING id
            "#,
        )
        .bind(&request.kind)
        .bind(payload)
        .bind(TaskStatus::Pending.as_str())
        .bind(request.priority.as_i32())
        .bind(&request.queue)
        .bind(i64::from(request.max_attempts))
        .bind(&request.owner_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let id: TaskId = row.try_get("id")?;
        debug!("创建任务成功: ID {}, 类型: {}", id, request.kind);
        Ok(request.clone().into_task(id, now))
    }

    #[instrument(skip(self), fields(task.id = %id))]
    async fn get(&self, id: TaskId) -> OrchestratorResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut task = Self::row_to_task(&row)?;
                task.logs = self.load_logs(id).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, task), fields(task.id = %task.id, task.status = %task.status, task.version = task.version))]
    async fn update(&self, task: &Task) -> OrchestratorResult<Task> {
        let last_error = task
            .last_error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, priority = $2, queue = $3, attempt_count = $4, max_attempts = $5,
                backend = $6, run_id = $7, worker_id = $8, next_attempt_at = $9, last_error = $10,
                started_at = $11, updated_at = $12, payload = $13, version = version + 1
            WHERE id = $14 AND version = $15
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.priority.as_i32())
        .bind(&task.queue)
        .bind(i64::from(task.attempt_count))
        .bind(i64::from(task.max_attempts))
        .bind(task.backend.map(BackendKind::as_str))
        .bind(&task.run_id)
        .bind(&task.worker_id)
        .bind(task.next_attempt_at)
        .bind(last_error)
        .bind(task.started_at)
        .bind(task.updated_at)
        .bind(serde_json::to_string(&task.payload)?)
        .bind(task.id)
        .bind(task.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
                .bind(task.id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                OrchestratorError::conflict(task.id, task.version)
            } else {
                OrchestratorError::task_not_found(task.id)
            });
        }

        self.get_required(task.id).await
    }

    #[instrument(skip(self, entries), fields(task.id = %id, count = entries.len()))]
    async fn append_logs(
        &self,
        id: TaskId,
        entries: &[TaskLogEntry],
        touched_at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(OrchestratorError::task_not_found(id));
        }

        for entry in entries {
            sqlx::query("INSERT INTO task_logs (task_id, timestamp, message) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(entry.timestamp)
                .bind(&entry.message)
                .execute(&mut *tx)
                .await?;
        }

        // 只刷新活跃任务的 updated_at，不改版本号
        sqlx::query(
            r#"
            UPDATE tasks SET updated_at = $1
            WHERE id = $2 AND updated_at < $1
              AND status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED')
            "#,
        )
        .bind(touched_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> OrchestratorResult<Vec<Task>> {
        self.select_by_status(statuses, None).await
    }

    #[instrument(skip(self, statuses))]
    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        updated_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>> {
        self.select_by_status(statuses, Some(updated_before)).await
    }
}
