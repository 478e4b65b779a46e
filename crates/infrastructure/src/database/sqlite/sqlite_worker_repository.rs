use async_trait::async_trait;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{Worker, WorkerRepository, WorkerStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &SqliteRow) -> OrchestratorResult<Worker> {
        let status: String = row.try_get("status")?;
        let queues: String = row.try_get("queues")?;
        let current_task_count: i64 = row.try_get("current_task_count")?;
        let success_count: i64 = row.try_get("success_count")?;
        let failure_count: i64 = row.try_get("failure_count")?;

        Ok(Worker {
            id: row.try_get("id")?,
            hostname: row.try_get("hostname")?,
            status: status.parse::<WorkerStatus>()?,
            queues: serde_json::from_str(&queues)?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            current_task_count: u32::try_from(current_task_count).unwrap_or_default(),
            success_count: u64::try_from(success_count).unwrap_or_default(),
            failure_count: u64::try_from(failure_count).unwrap_or_default(),
            average_duration_ms: row.try_get("average_duration_ms")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn get(&self, id: &str) -> OrchestratorResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_worker).transpose()
    }

    async fn save(&self, worker: &Worker) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, hostname, status, queues, last_heartbeat, current_task_count,
                                 success_count, failure_count, average_duration_ms, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(id) DO UPDATE SET
                hostname = excluded.hostname,
                status = excluded.status,
                queues = excluded.queues,
                last_heartbeat = excluded.last_heartbeat,
                current_task_count = excluded.current_task_count,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                average_duration_ms = excluded.average_duration_ms
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.hostname)
        .bind(worker.status.as_str())
        .bind(serde_json::to_string(&worker.queues)?)
        .bind(worker.last_heartbeat)
        .bind(i64::from(worker.current_task_count))
        .bind(i64::try_from(worker.success_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(worker.failure_count).unwrap_or(i64::MAX))
        .bind(worker.average_duration_ms)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await?;

        debug!("保存Worker成功: {}", worker.id);
        Ok(())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }
}
