use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use orchestrator_dispatcher::{BulkOperation, TaskSubmission};
use orchestrator_domain::{TaskId, TaskPriority};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    middleware::Actor,
    response::{created, success},
    routes::AppState,
};

/// 任务提交请求，提交者取自 `x-actor-id`
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub queue: Option<String>,
    pub priority: Option<TaskPriority>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReprioritizeRequest {
    pub priority: TaskPriority,
}

/// 批量请求：`{"task_ids": [..], "action": "cancel", "reason": ".."}`
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub task_ids: Vec<TaskId>,
    #[serde(flatten)]
    pub operation: BulkOperation,
}

pub async fn create_task(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut submission = TaskSubmission::new(request.kind, actor).with_payload(request.payload);
    if let Some(queue) = request.queue {
        submission = submission.with_queue(queue);
    }
    if let Some(priority) = request.priority {
        submission = submission.with_priority(priority);
    }
    if let Some(max_attempts) = request.max_attempts {
        submission = submission.with_max_attempts(max_attempts);
    }

    let task = state.submissions.submit(submission).await?;
    Ok(created(task))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> ApiResult<impl IntoResponse> {
    let task = state.tasks.get_required(id).await?;
    Ok(success(task))
}

pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.pause(id, &actor).await?))
}

pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.resume(id, &actor).await?))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Query(params): Query<CancelParams>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    Ok(success(
        state.controller.cancel(id, &actor, params.reason).await?,
    ))
}

pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Actor(actor): Actor,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.retry(id, &actor).await?))
}

pub async fn reprioritize_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
    Actor(actor): Actor,
    Json(request): Json<ReprioritizeRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(
        state
            .controller
            .reprioritize(id, &actor, request.priority)
            .await?,
    ))
}

/// 部分失败时仍返回 200，失败明细在 `failed` 中
pub async fn bulk_control(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(request): Json<BulkRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .controller
        .bulk(request.operation, &request.task_ids, &actor)
        .await?;
    Ok(success(result))
}

pub async fn get_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.audit_trail(id).await?))
}
