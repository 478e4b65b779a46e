use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::{error::ApiError, routes::AppState};

/// Prometheus 文本格式
pub async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("指标记录器未安装".to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
