use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::entities::{BackendKind, Task, TaskId};

/// 一次提交的句柄，用于取消
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub task_id: TaskId,
    pub run_id: String,
    pub backend: BackendKind,
    pub worker_id: Option<String>,
}

impl ExecutionHandle {
    /// 从已提交任务的记录还原句柄
    pub fn for_task(task: &Task) -> Option<Self> {
        Some(Self {
            task_id: task.id,
            run_id: task.run_id.clone()?,
            backend: task.backend?,
            worker_id: task.worker_id.clone(),
        })
    }
}

/// 执行后端：分布式Worker池与本地回退执行器实现同一契约
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 任务必须已经带有 `run_id`
    async fn submit(&self, task: &Task) -> OrchestratorResult<ExecutionHandle>;

    async fn cancel(&self, handle: &ExecutionHandle) -> OrchestratorResult<()>;

    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// 动作执行器返回的失败
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionFailure {
    pub class: FailureClass,
    pub kind: String,
    pub message: String,
}

impl ExecutionFailure {
    pub fn transient(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn permanent(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl From<ExecutionFailure> for OrchestratorError {
    fn from(failure: ExecutionFailure) -> Self {
        match failure.class {
            FailureClass::Transient => OrchestratorError::TransientExecution {
                kind: failure.kind,
                message: failure.message,
            },
            FailureClass::Permanent => OrchestratorError::PermanentExecution {
                kind: failure.kind,
                message: failure.message,
            },
        }
    }
}

impl From<OrchestratorError> for ExecutionFailure {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::TransientExecution { kind, message } => {
                ExecutionFailure::transient(kind, message)
            }
            OrchestratorError::PermanentExecution { kind, message } => {
                ExecutionFailure::permanent(kind, message)
            }
            other if other.is_retryable() => ExecutionFailure::transient("infrastructure", other.to_string()),
            other => ExecutionFailure::permanent("internal", other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub output: Option<String>,
}

pub type ActionResult = Result<ActionOutput, ExecutionFailure>;

/// 执行过程中的日志与进度上报
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn log(&self, message: String);
    async fn progress(&self, percent: u8, message: Option<String>);
}

/// 传给动作执行器的上下文
#[derive(Clone)]
pub struct ActionContext {
    pub task_id: TaskId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub cancellation: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

impl ActionContext {
    /// 安全点检查
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn log(&self, message: impl Into<String>) {
        self.progress.log(message.into()).await;
    }

    pub async fn report_progress(&self, percent: u8, message: Option<String>) {
        self.progress.progress(percent, message).await;
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("task_id", &self.task_id)
            .field("kind", &self.kind)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 外部动作执行器，必须能承受至少一次语义下的重复调用
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> ActionResult;
}

/// 执行器回报时用来定位本次运行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRef {
    pub task_id: TaskId,
    pub run_id: String,
    pub backend: BackendKind,
    pub worker_id: Option<String>,
}

/// 执行器把尝试进展回报给编排核心
///
/// `on_claimed` 返回 None 表示本次运行已失效（任务被取消、暂停或重新提交），执行器不应继续。
/// 结果回报在运行失效时同样返回 None，只记录日志。
#[async_trait]
pub trait ExecutionReporter: Send + Sync {
    async fn on_claimed(&self, attempt: &AttemptRef) -> OrchestratorResult<Option<Task>>;

    async fn on_log(&self, task_id: TaskId, message: String) -> OrchestratorResult<()>;

    async fn on_progress(
        &self,
        task_id: TaskId,
        percent: u8,
        message: Option<String>,
    ) -> OrchestratorResult<()>;

    async fn on_succeeded(
        &self,
        attempt: &AttemptRef,
        output: Option<String>,
        duration_ms: u64,
    ) -> OrchestratorResult<Option<Task>>;

    async fn on_failed(
        &self,
        attempt: &AttemptRef,
        failure: ExecutionFailure,
        duration_ms: u64,
    ) -> OrchestratorResult<Option<Task>>;
}
