use axum::{extract::State, Json};
use orchestrator_domain::BackendKind;
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let online_workers = match state.registry.online_workers().await {
        Ok(workers) => Some(workers.len()),
        Err(e) => {
            tracing::warn!(error = %e, "健康检查读取Worker注册表失败");
            None
        }
    };

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "deployment-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "active_backend": state.supervisor.active_kind().await.map(BackendKind::as_str),
        "online_workers": online_workers,
        "event_subscribers": state.events.subscriber_count(),
    }))
}
