use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{ControlAction, ControlActionKind, ControlActionRepository, TaskId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

/// 控制操作审计表，只插入不更新
pub struct SqliteControlActionRepository {
    pool: SqlitePool,
}

impl SqliteControlActionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_action(row: &SqliteRow) -> OrchestratorResult<ControlAction> {
        let id: String = row.try_get("id")?;
        let action: String = row.try_get("action")?;
        let outcome: String = row.try_get("outcome")?;

        Ok(ControlAction {
            id: Uuid::parse_str(&id)
                .map_err(|e| OrchestratorError::Serialization(format!("审计记录ID无效: {e}")))?,
            task_id: row.try_get("task_id")?,
            action: action.parse::<ControlActionKind>()?,
            actor_id: row.try_get("actor_id")?,
            timestamp: row.try_get("timestamp")?,
            reason: row.try_get("reason")?,
            outcome: outcome.parse()?,
            detail: row.try_get("detail")?,
        })
    }
}

#[async_trait]
impl ControlActionRepository for SqliteControlActionRepository {
    #[instrument(skip(self, action), fields(task.id = %action.task_id, action = %action.action))]
    async fn record(&self, action: &ControlAction) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO control_actions (id, task_id, action, actor_id, timestamp, reason, outcome, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(action.id.to_string())
        .bind(action.task_id)
        .bind(action.action.as_str())
        .bind(&action.actor_id)
        .bind(action.timestamp)
        .bind(&action.reason)
        .bind(action.outcome.as_str())
        .bind(&action.detail)
        .execute(&self.pool)
        .await?;

        debug!("写入审计记录: {} {}", action.task_id, action.action);
        Ok(())
    }

    async fn list_for_task(&self, task_id: TaskId) -> OrchestratorResult<Vec<ControlAction>> {
        let rows = sqlx::query(
            "SELECT * FROM control_actions WHERE task_id = $1 ORDER BY timestamp, rowid",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_action).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use orchestrator_core::config::DatabaseConfig;
    use orchestrator_domain::ControlOutcome;

    use super::*;
    use crate::database::DatabaseManager;

    #[tokio::test]
    async fn audit_rows_are_listed_per_task() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        let repo = SqliteControlActionRepository::new(manager.pool().clone());
        let now = Utc::now();

        let applied = ControlAction::new(1, ControlActionKind::Cancel, "alice", now, ControlOutcome::Applied)
            .with_reason(Some("rollback".into()))
            .with_detail("QUEUED -> CANCELLED");
        let rejected = ControlAction::new(1, ControlActionKind::Cancel, "bob", now, ControlOutcome::Rejected);
        let other = ControlAction::new(2, ControlActionKind::Pause, "alice", now, ControlOutcome::Applied);
        for action in [&applied, &rejected, &other] {
            repo.record(action).await.unwrap();
        }

        let trail = repo.list_for_task(1).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0], applied);
        assert_eq!(trail[1].outcome, ControlOutcome::Rejected);
    }
}
