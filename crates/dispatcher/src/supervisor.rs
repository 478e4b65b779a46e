use std::sync::Arc;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{BackendKind, ExecutionBackend, ExecutionHandle};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::worker_registry::WorkerRegistry;

/// 执行后端选择
///
/// 每个准入周期调用一次 [`BackendSupervisor::select`]：至少有一个心跳新鲜的 Worker 且代理健康时
/// 使用分布式后端，否则回退到本地执行器。已经提交的任务不会因为切换而迁移。
pub struct BackendSupervisor {
    distributed: Option<Arc<dyn ExecutionBackend>>,
    local: Option<Arc<dyn ExecutionBackend>>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<MetricsCollector>,
    current: Mutex<Option<BackendKind>>,
}

impl BackendSupervisor {
    pub fn new(
        distributed: Option<Arc<dyn ExecutionBackend>>,
        local: Option<Arc<dyn ExecutionBackend>>,
        registry: Arc<WorkerRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            distributed,
            local,
            registry,
            metrics,
            current: Mutex::new(None),
        }
    }

    async fn evaluate(&self) -> Option<Arc<dyn ExecutionBackend>> {
        if let Some(distributed) = &self.distributed {
            let workers_online = match self.registry.has_online_workers().await {
                Ok(online) => online,
                Err(e) => {
                    warn!(error = %e, "读取Worker注册表失败，按无可用Worker处理");
                    false
                }
            };
            if workers_online && distributed.is_healthy().await {
                return Some(distributed.clone());
            }
        }

        if let Some(local) = &self.local {
            if local.is_healthy().await {
                return Some(local.clone());
            }
        }
        None
    }

    /// 重新评估并返回当前应使用的后端
    pub async fn select(&self) -> OrchestratorResult<Arc<dyn ExecutionBackend>> {
        let selected = self.evaluate().await;
        let selected_kind = selected.as_ref().map(|b| b.kind());

        let mut current = self.current.lock().await;
        if *current != selected_kind {
            StructuredLogger::log_backend_switch(
                current.map(BackendKind::as_str),
                selected_kind.map(BackendKind::as_str),
            );
            self.metrics
                .update_active_backend(selected_kind.map(BackendKind::as_str));
            *current = selected_kind;
        }
        drop(current);

        selected.ok_or_else(|| OrchestratorError::backend_unavailable("分布式与本地执行器均不可用"))
    }

    /// 最近一次选择的结果
    pub async fn active_kind(&self) -> Option<BackendKind> {
        *self.current.lock().await
    }

    pub fn backend_for(&self, kind: BackendKind) -> Option<Arc<dyn ExecutionBackend>> {
        match kind {
            BackendKind::Distributed => self.distributed.clone(),
            BackendKind::Local => self.local.clone(),
        }
    }

    /// 尽力通知执行器取消，失败只记录日志
    pub async fn cancel(&self, handle: &ExecutionHandle) {
        let Some(backend) = self.backend_for(handle.backend) else {
            warn!(task.id = handle.task_id, backend = %handle.backend, "取消时找不到对应的执行后端");
            return;
        };

        match backend.cancel(handle).await {
            Ok(()) => debug!(task.id = handle.task_id, run.id = %handle.run_id, "已发送取消信号"),
            Err(e) => warn!(task.id = handle.task_id, error = %e, "发送取消信号失败"),
        }
    }
}
