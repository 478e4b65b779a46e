use axum::{extract::State, response::IntoResponse};

use crate::{error::ApiResult, response::success, routes::AppState};

/// 获取Worker列表
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let workers = state.registry.list().await?;
    Ok(success(workers))
}
