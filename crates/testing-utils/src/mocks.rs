//! 测试替身

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    ActionContext, ActionExecutor, ActionOutput, ActionResult, BackendKind, ExecutionBackend,
    ExecutionFailure, ExecutionHandle, Task, TaskId,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 一次调用的记录
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub task_id: TaskId,
    pub kind: String,
    pub attempt: u32,
}

/// 按脚本依次返回结果的动作执行器；脚本用完后一律成功
pub struct ScriptedActionExecutor {
    outcomes: Mutex<VecDeque<ActionResult>>,
    calls: Mutex<Vec<ActionCall>>,
    block_until_cancelled: bool,
}

impl ScriptedActionExecutor {
    pub fn new(outcomes: Vec<ActionResult>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            block_until_cancelled: false,
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(Vec::new())
    }

    /// 先返回 `failures` 次可重试错误，然后成功
    pub fn transient_failures(failures: usize) -> Self {
        Self::new(
            (0..failures)
                .map(|i| Err(ExecutionFailure::transient("network", format!("连接被重置 #{}", i + 1))))
                .collect(),
        )
    }

    /// 一直运行到收到取消信号
    pub fn blocking() -> Self {
        Self {
            block_until_cancelled: true,
            ..Self::always_succeed()
        }
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedActionExecutor {
    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        lock(&self.calls).push(ActionCall {
            task_id: ctx.task_id,
            kind: ctx.kind.clone(),
            attempt: ctx.attempt,
        });
        ctx.log(format!("开始执行 {}", ctx.kind)).await;

        if self.block_until_cancelled {
            ctx.cancellation.cancelled().await;
            return Err(ExecutionFailure::permanent("cancelled", "执行被取消"));
        }

        ctx.report_progress(100, None).await;
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Ok(ActionOutput { output: Some("ok".to_string()) }))
    }
}

/// 只记录提交与取消的执行后端
pub struct RecordingBackend {
    kind: BackendKind,
    healthy: AtomicBool,
    reject_submissions: AtomicBool,
    submitted: Mutex<Vec<Task>>,
    cancelled: Mutex<Vec<ExecutionHandle>>,
}

impl RecordingBackend {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            healthy: AtomicBool::new(true),
            reject_submissions: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<Task> {
        lock(&self.submitted).clone()
    }

    pub fn submitted_ids(&self) -> Vec<TaskId> {
        lock(&self.submitted).iter().map(|t| t.id).collect()
    }

    pub fn cancelled(&self) -> Vec<ExecutionHandle> {
        lock(&self.cancelled).clone()
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn submit(&self, task: &Task) -> OrchestratorResult<ExecutionHandle> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(OrchestratorError::MessageQueue("后端拒绝提交".to_string()));
        }
        let handle = ExecutionHandle::for_task(task)
            .ok_or_else(|| OrchestratorError::Internal(format!("任务 {} 没有运行标识", task.id)))?;
        lock(&self.submitted).push(task.clone());
        Ok(handle)
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> OrchestratorResult<()> {
        lock(&self.cancelled).push(handle.clone());
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
