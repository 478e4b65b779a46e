use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator_dispatcher::{BackendSupervisor, SubmissionService, TaskController, WorkerRegistry};
use orchestrator_domain::TaskRepository;
use orchestrator_infrastructure::EventBus;

use crate::handlers::{
    events::stream_events,
    health::health_check,
    metrics::render_metrics,
    tasks::{
        bulk_control, cancel_task, create_task, get_audit_trail, get_task, pause_task,
        reprioritize_task, resume_task, retry_task,
    },
    workers::list_workers,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskRepository>,
    pub submissions: Arc<SubmissionService>,
    pub controller: Arc<TaskController>,
    pub registry: Arc<WorkerRegistry>,
    pub supervisor: Arc<BackendSupervisor>,
    pub events: EventBus,
    /// 未安装 Prometheus 记录器时为空
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 任务提交与控制
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/bulk", post(bulk_control))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/retry", post(retry_task))
        .route("/api/tasks/{id}/priority", put(reprioritize_task))
        .route("/api/tasks/{id}/audit", get(get_audit_trail))
        .route("/api/workers", get(list_workers))
        .route("/api/events", get(stream_events))
        .with_state(state)
}
