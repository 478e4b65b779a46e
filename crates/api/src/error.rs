use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::OrchestratorError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("服务不可用: {0}")]
    Unavailable(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestrator(e) => match e {
                OrchestratorError::TaskNotFound { .. } | OrchestratorError::WorkerNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                OrchestratorError::InvalidState { .. }
                | OrchestratorError::InvalidTransition { .. }
                | OrchestratorError::Conflict { .. } => StatusCode::CONFLICT,
                OrchestratorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                OrchestratorError::InvalidTaskParams(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Orchestrator(e) => e.code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unavailable(_) => "unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 内部错误只返回通用提示，细节写日志
        let message = match &self {
            ApiError::Orchestrator(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %e, "请求处理失败");
                e.user_message().to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        let mut response = (status, body).into_response();
        if let ApiError::Orchestrator(OrchestratorError::RateLimited {
            retry_after_secs, ..
        }) = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
