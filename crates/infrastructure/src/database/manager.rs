use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::config::DatabaseConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{ControlActionRepository, TaskRepository, WorkerRepository};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::sqlite::{
    SqliteControlActionRepository, SqliteTaskRepository, SqliteWorkerRepository,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'PENDING',
        priority INTEGER NOT NULL DEFAULT 5,
        queue TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        owner_id TEXT NOT NULL,
        backend TEXT,
        run_id TEXT,
        worker_id TEXT,
        next_attempt_at DATETIME,
        last_error TEXT,
        created_at DATETIME NOT NULL,
        started_at DATETIME,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        timestamp DATETIME NOT NULL,
        message TEXT NOT NULL,
        FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS control_actions (
        id TEXT PRIMARY KEY,
        task_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        timestamp DATETIME NOT NULL,
        reason TEXT,
        outcome TEXT NOT NULL,
        detail TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        status TEXT NOT NULL,
        queues TEXT NOT NULL DEFAULT '[]',
        last_heartbeat DATETIME NOT NULL,
        current_task_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        average_duration_ms REAL NOT NULL DEFAULT 0,
        registered_at DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status_updated_at ON tasks(status, updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_queue ON tasks(queue)",
    "CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_control_actions_task_id ON control_actions(task_id)",
];

/// SQLite Job Store 连接管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // 内存库只存在于单个连接中
        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await?;

        info!("已连接Job Store数据库: {}", config.url);
        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 建表，重复执行无副作用
    pub async fn migrate(&self) -> OrchestratorResult<()> {
        debug!("初始化数据库表结构");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(SqliteTaskRepository::new(self.pool.clone()))
    }

    pub fn worker_repository(&self) -> Arc<dyn WorkerRepository> {
        Arc::new(SqliteWorkerRepository::new(self.pool.clone()))
    }

    pub fn control_action_repository(&self) -> Arc<dyn ControlActionRepository> {
        Arc::new(SqliteControlActionRepository::new(self.pool.clone()))
    }
}
