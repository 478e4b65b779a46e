use thiserror::Error;

/// 编排引擎错误类型定义
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("数据库操作失败: {0}")]
    Database(String),

    #[error("任务不存在: id={id}")]
    TaskNotFound { id: i64 },

    #[error("Worker不存在: id={id}")]
    WorkerNotFound { id: String },

    #[error("任务参数无效: {0}")]
    InvalidTaskParams(String),

    /// 状态机不允许的迁移
    #[error("任务 {task_id} 不允许从 {from} 迁移到 {to}")]
    InvalidTransition {
        task_id: i64,
        from: String,
        to: String,
    },

    /// 任务已处于终态，控制操作被拒绝
    #[error("任务 {task_id} 已处于终态 {status}")]
    InvalidState { task_id: i64, status: String },

    /// 乐观锁版本不一致，调用方需要重新读取
    #[error("任务 {task_id} 版本冲突: 期望版本 {expected_version}")]
    Conflict { task_id: i64, expected_version: i64 },

    #[error("没有可用的执行后端: {0}")]
    BackendUnavailable(String),

    #[error("操作者 {actor_id} 请求过于频繁，请在 {retry_after_secs} 秒后重试")]
    RateLimited {
        actor_id: String,
        retry_after_secs: u64,
    },

    #[error("可重试的执行错误[{kind}]: {message}")]
    TransientExecution { kind: String, message: String },

    #[error("不可重试的执行错误[{kind}]: {message}")]
    PermanentExecution { kind: String, message: String },

    #[error("消息队列操作失败: {0}")]
    MessageQueue(String),

    #[error("数据序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }

    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }

    pub fn invalid_transition(
        task_id: i64,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            task_id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_state(task_id: i64, status: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            task_id,
            status: status.to_string(),
        }
    }

    pub fn conflict(task_id: i64, expected_version: i64) -> Self {
        Self::Conflict {
            task_id,
            expected_version,
        }
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, OrchestratorError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TaskNotFound { .. } | OrchestratorError::WorkerNotFound { .. }
        )
    }

    /// 基础设施层面的可重试错误，与任务级别的重试策略无关
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Database(_)
                | OrchestratorError::MessageQueue(_)
                | OrchestratorError::Conflict { .. }
                | OrchestratorError::TransientExecution { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_) | OrchestratorError::Configuration(_)
        )
    }

    /// 稳定的错误码，用于批量操作结果和HTTP响应
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::TaskNotFound { .. } => "task_not_found",
            OrchestratorError::WorkerNotFound { .. } => "worker_not_found",
            OrchestratorError::InvalidTaskParams(_) => "invalid_params",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::InvalidState { .. } => "invalid_state",
            OrchestratorError::Conflict { .. } => "conflict",
            OrchestratorError::BackendUnavailable(_) => "backend_unavailable",
            OrchestratorError::RateLimited { .. } => "rate_limited",
            OrchestratorError::TransientExecution { .. } => "transient_execution_error",
            OrchestratorError::PermanentExecution { .. } => "permanent_execution_error",
            _ => "internal_error",
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            OrchestratorError::TaskNotFound { .. } => "请求的任务不存在",
            OrchestratorError::WorkerNotFound { .. } => "请求的Worker节点不存在",
            OrchestratorError::InvalidTaskParams(_) => "任务参数配置有误",
            OrchestratorError::InvalidTransition { .. } => "当前任务状态不支持该操作",
            OrchestratorError::InvalidState { .. } => "任务已结束，无法再执行控制操作",
            OrchestratorError::Conflict { .. } => "任务已被其他操作修改，请刷新后重试",
            OrchestratorError::BackendUnavailable(_) => "暂无可用的执行节点，任务保持等待",
            OrchestratorError::RateLimited { .. } => "操作过于频繁，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable_but_invalid_state_is_not() {
        assert!(OrchestratorError::conflict(1, 3).is_retryable());
        assert!(!OrchestratorError::invalid_state(1, "CANCELLED").is_retryable());
        assert!(OrchestratorError::conflict(1, 3).is_conflict());
    }

    #[test]
    fn messages_carry_context() {
        let err = OrchestratorError::invalid_transition(7, "SUCCEEDED", "QUEUED");
        assert_eq!(err.to_string(), "任务 7 不允许从 SUCCEEDED 迁移到 QUEUED");

        let err = OrchestratorError::RateLimited {
            actor_id: "alice".into(),
            retry_after_secs: 12,
        };
        assert!(err.to_string().contains("alice"));
        assert_eq!(err.user_message(), "操作过于频繁，请稍后重试");
        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn sqlx_errors_become_database_errors() {
        let err: OrchestratorError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, OrchestratorError::Database(_)));
        assert!(!err.is_fatal());
    }
}
