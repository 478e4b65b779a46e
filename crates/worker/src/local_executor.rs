use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use orchestrator_core::config::LocalExecutorConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    ActionContext, ActionExecutor, AttemptRef, BackendKind, ExecutionBackend, ExecutionHandle,
    ExecutionReporter, ProgressSink, Task, TaskId,
};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 把动作执行器的日志与进度直接交给编排核心
struct ReporterSink {
    reporter: Arc<dyn ExecutionReporter>,
    task_id: TaskId,
}

#[async_trait]
impl ProgressSink for ReporterSink {
    async fn log(&self, message: String) {
        if let Err(e) = self.reporter.on_log(self.task_id, message).await {
            warn!(task.id = self.task_id, error = %e, "写入任务日志失败");
        }
    }

    async fn progress(&self, percent: u8, message: Option<String>) {
        if let Err(e) = self.reporter.on_progress(self.task_id, percent, message).await {
            warn!(task.id = self.task_id, error = %e, "上报任务进度失败");
        }
    }
}

/// 本地回退执行器
///
/// 在编排进程内用有界并发池运行任务，与分布式Worker遵循同一回报契约。
/// 每次运行有独立的取消令牌，按 `run_id` 索引；进程退出时未完成的运行由启动恢复处理。
pub struct LocalExecutor {
    reporter: Arc<dyn ExecutionReporter>,
    actions: Arc<dyn ActionExecutor>,
    slots: Arc<Semaphore>,
    concurrency: usize,
    runs: Arc<Mutex<HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl LocalExecutor {
    pub fn new(
        reporter: Arc<dyn ExecutionReporter>,
        actions: Arc<dyn ActionExecutor>,
        config: &LocalExecutorConfig,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        info!(concurrency, "本地执行器已创建");
        Self {
            reporter,
            actions,
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// 已提交但尚未结束的运行数，包括等待执行槽位的
    pub async fn active_runs(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// 正在占用执行槽位的运行数
    pub fn busy_slots(&self) -> usize {
        self.concurrency - self.slots.available_permits()
    }

    /// 取消所有运行并拒绝新的提交
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let runs = self.runs.lock().await;
        for token in runs.values() {
            token.cancel();
        }
        info!(runs = runs.len(), "本地执行器已停止");
    }

    async fn run_attempt(
        reporter: Arc<dyn ExecutionReporter>,
        actions: Arc<dyn ActionExecutor>,
        slots: Arc<Semaphore>,
        attempt: AttemptRef,
        token: CancellationToken,
    ) {
        let _permit = tokio::select! {
            _ = token.cancelled() => {
                debug!(task.id = attempt.task_id, run.id = %attempt.run_id, "运行在等待槽位时被取消");
                return;
            }
            permit = slots.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let task = match reporter.on_claimed(&attempt).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task.id = attempt.task_id, run.id = %attempt.run_id, "认领被拒绝，放弃本次运行");
                return;
            }
            Err(e) => {
                error!(task.id = attempt.task_id, error = %e, "认领任务失败");
                return;
            }
        };

        let ctx = ActionContext {
            task_id: task.id,
            kind: task.kind.clone(),
            payload: task.payload.clone(),
            attempt: task.attempt_count + 1,
            cancellation: token.clone(),
            progress: Arc::new(ReporterSink {
                reporter: reporter.clone(),
                task_id: task.id,
            }),
        };

        let started = Instant::now();
        let result = actions.execute(ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if token.is_cancelled() {
            info!(task.id = task.id, run.id = %attempt.run_id, duration_ms, "运行已取消，不再回报结果");
            return;
        }

        let reported = match result {
            Ok(output) => reporter.on_succeeded(&attempt, output.output, duration_ms).await,
            Err(failure) => reporter.on_failed(&attempt, failure, duration_ms).await,
        };
        if let Err(e) = reported {
            error!(task.id = task.id, error = %e, "回报执行结果失败，等待恢复流程处理");
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalExecutor {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn submit(&self, task: &Task) -> OrchestratorResult<ExecutionHandle> {
        if self.shutdown.is_cancelled() {
            return Err(OrchestratorError::backend_unavailable("本地执行器已停止"));
        }
        let handle = ExecutionHandle::for_task(task).ok_or_else(|| {
            OrchestratorError::Internal(format!("任务 {} 没有运行标识", task.id))
        })?;

        let token = self.shutdown.child_token();
        self.runs
            .lock()
            .await
            .insert(handle.run_id.clone(), token.clone());

        let attempt = AttemptRef {
            task_id: handle.task_id,
            run_id: handle.run_id.clone(),
            backend: BackendKind::Local,
            worker_id: None,
        };
        let reporter = self.reporter.clone();
        let actions = self.actions.clone();
        let slots = self.slots.clone();
        let runs = self.runs.clone();

        tokio::spawn(async move {
            let run_id = attempt.run_id.clone();
            Self::run_attempt(reporter, actions, slots, attempt, token).await;
            runs.lock().await.remove(&run_id);
        });

        debug!(task.id = handle.task_id, run.id = %handle.run_id, "任务已提交到本地执行器");
        Ok(handle)
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> OrchestratorResult<()> {
        match self.runs.lock().await.get(&handle.run_id) {
            Some(token) => {
                token.cancel();
                info!(task.id = handle.task_id, run.id = %handle.run_id, "本地运行已取消");
            }
            None => debug!(task.id = handle.task_id, run.id = %handle.run_id, "取消的运行已结束"),
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}
