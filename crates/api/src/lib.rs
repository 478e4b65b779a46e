//! # Orchestrator API
//!
//! 管理接口：任务提交、控制操作、审计记录、Worker列表、任务事件流以及健康检查与指标。
//!
//! ## API 端点
//!
//! - `POST /api/tasks` - 提交任务
//! - `GET /api/tasks/{id}` - 任务详情
//! - `POST /api/tasks/{id}/pause|resume|cancel|retry` - 控制操作
//! - `PUT /api/tasks/{id}/priority` - 调整优先级
//! - `POST /api/tasks/bulk` - 批量控制
//! - `GET /api/tasks/{id}/audit` - 审计记录
//! - `GET /api/workers` - Worker列表
//! - `GET /api/events?task_id=` - SSE 事件流
//! - `GET /health`、`GET /metrics`
//!
//! 写操作需要 `x-actor-id` 请求头。错误映射：不存在 404，状态冲突 409，限流 429（带 `Retry-After`），
//! 参数错误 400，没有可用后端 503。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, cors_enabled: bool) -> Router {
    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );
    if cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
