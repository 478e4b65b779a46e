use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::TaskPriority;

pub type TaskId = i64;

/// 失败原因标签，区分恢复流程造成的失败和执行器自身的错误
pub mod failure_reason {
    pub const RECOVERY_TIMEOUT: &str = "recovery timeout";
    pub const RECOVERY_RETRIES_EXHAUSTED: &str = "recovery retries exhausted";
    pub const RETRIES_EXHAUSTED: &str = "retries exhausted";
    pub const PERMANENT_ERROR: &str = "permanent error";
    pub const NON_RETRYABLE_KIND: &str = "non-retryable error kind";
    /// 本次尝试失败，任务已安排退避重试
    pub const ATTEMPT_FAILED: &str = "attempt failed";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OrchestratorError::invalid_params(format!("未知的任务状态: {s}")))
    }
}

/// 任务被交给哪个执行后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Distributed,
    Local,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Distributed => "distributed",
            BackendKind::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "distributed" => Ok(BackendKind::Distributed),
            "local" => Ok(BackendKind::Local),
            other => Err(OrchestratorError::Serialization(format!(
                "未知的执行后端: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TaskLogEntry {
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// 任务失败的结构化原因
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    /// 见 [`failure_reason`]
    pub reason: String,
    pub error_kind: Option<String>,
    pub message: String,
    /// 失败时已经结束的尝试次数
    pub attempts: u32,
    pub occurred_at: DateTime<Utc>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (共尝试 {} 次)",
            self.reason, self.message, self.attempts
        )
    }
}

/// 部署任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub queue: String,
    /// 已经结束（成功、失败或被恢复流程放弃）的尝试次数
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// 乐观锁版本号，每次状态写入加一
    pub version: i64,
    pub owner_id: String,
    /// 已提交到的执行后端；排队中但尚未提交时为 None
    pub backend: Option<BackendKind>,
    /// 本次提交的运行标识，执行器回报必须携带相同的值
    pub run_id: Option<String>,
    pub worker_id: Option<String>,
    /// 退避期间的最早再次准入时间
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<TaskFailure>,
    /// 列表查询不加载日志，只有按 id 读取时填充
    #[serde(default)]
    pub logs: Vec<TaskLogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 已交给执行后端的任务，计入队列深度
    pub fn is_in_flight(&self) -> bool {
        match self.status {
            TaskStatus::Running => true,
            TaskStatus::Queued => self.backend.is_some(),
            _ => false,
        }
    }

    /// 等待调度器准入的任务
    pub fn is_admissible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Queued => {
                self.backend.is_none() && self.next_attempt_at.map_or(true, |at| at <= now)
            }
            _ => false,
        }
    }

    /// 清除提交信息，任务回到积压队列
    pub fn release_submission(&mut self) {
        self.backend = None;
        self.run_id = None;
        self.worker_id = None;
    }

    /// 为新的提交分配运行标识
    pub fn assign_submission(&mut self, backend: BackendKind) -> String {
        let run_id = Uuid::new_v4().to_string();
        self.backend = Some(backend);
        self.run_id = Some(run_id.clone());
        self.worker_id = None;
        self.next_attempt_at = None;
        run_id
    }
}

/// 任务创建请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub priority: TaskPriority,
    pub owner_id: String,
    pub max_attempts: u32,
}

impl NewTask {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.kind.trim().is_empty() {
            return Err(OrchestratorError::invalid_params("任务类型不能为空"));
        }
        if self.queue.trim().is_empty() {
            return Err(OrchestratorError::invalid_params("队列名称不能为空"));
        }
        if self.owner_id.trim().is_empty() {
            return Err(OrchestratorError::invalid_params("任务所有者不能为空"));
        }
        if self.max_attempts == 0 {
            return Err(OrchestratorError::invalid_params("最大尝试次数必须大于0"));
        }
        Ok(())
    }

    /// 按请求构造一条 Pending 状态的任务记录，id 由存储层分配
    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            kind: self.kind,
            payload: self.payload,
            status: TaskStatus::Pending,
            priority: self.priority,
            queue: self.queue,
            attempt_count: 0,
            max_attempts: self.max_attempts,
            version: 1,
            owner_id: self.owner_id,
            backend: None,
            run_id: None,
            worker_id: None,
            next_attempt_at: None,
            last_error: None,
            logs: Vec::new(),
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Online => "ONLINE",
            WorkerStatus::Offline => "OFFLINE",
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(WorkerStatus::Online),
            "OFFLINE" => Ok(WorkerStatus::Offline),
            other => Err(OrchestratorError::Serialization(format!(
                "未知的Worker状态: {other}"
            ))),
        }
    }
}

/// 分布式执行节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub queues: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task_count: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_duration_ms: f64,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            status: WorkerStatus::Online,
            queues: Vec::new(),
            last_heartbeat: now,
            current_task_count: 0,
            success_count: 0,
            failure_count: 0,
            average_duration_ms: 0.0,
            registered_at: now,
        }
    }

    pub fn is_heartbeat_fresh(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.last_heartbeat < stale_after
    }

    pub fn is_available(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == WorkerStatus::Online && self.is_heartbeat_fresh(now, stale_after)
    }

    pub fn serves_queue(&self, queue: &str) -> bool {
        self.queues.iter().any(|q| q == queue)
    }

    /// 累计移动平均
    pub fn record_completion(&mut self, duration_ms: u64, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let completed = (self.success_count + self.failure_count) as f64;
        self.average_duration_ms += (duration_ms as f64 - self.average_duration_ms) / completed;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ControlActionKind {
    Pause,
    Resume,
    Cancel,
    Retry,
    Reprioritize,
}

impl ControlActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlActionKind::Pause => "pause",
            ControlActionKind::Resume => "resume",
            ControlActionKind::Cancel => "cancel",
            ControlActionKind::Retry => "retry",
            ControlActionKind::Reprioritize => "reprioritize",
        }
    }
}

impl fmt::Display for ControlActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlActionKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(ControlActionKind::Pause),
            "resume" => Ok(ControlActionKind::Resume),
            "cancel" => Ok(ControlActionKind::Cancel),
            "retry" => Ok(ControlActionKind::Retry),
            "reprioritize" => Ok(ControlActionKind::Reprioritize),
            other => Err(OrchestratorError::invalid_params(format!(
                "未知的控制操作: {other}"
            ))),
        }
    }
}

/// 审计记录的结果：真正生效的迁移，或被拒绝的空操作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    Applied,
    Rejected,
}

impl ControlOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlOutcome::Applied => "applied",
            ControlOutcome::Rejected => "rejected",
        }
    }
}

impl FromStr for ControlOutcome {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(ControlOutcome::Applied),
            "rejected" => Ok(ControlOutcome::Rejected),
            other => Err(OrchestratorError::Serialization(format!(
                "未知的审计结果: {other}"
            ))),
        }
    }
}

/// 控制操作审计记录，写入后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlAction {
    pub id: Uuid,
    pub task_id: TaskId,
    pub action: ControlActionKind,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub outcome: ControlOutcome,
    /// 迁移前后的状态或拒绝原因
    pub detail: Option<String>,
}

impl ControlAction {
    pub fn new(
        task_id: TaskId,
        action: ControlActionKind,
        actor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        outcome: ControlOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            action,
            actor_id: actor_id.into(),
            timestamp,
            reason: None,
            outcome,
            detail: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
