use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use orchestrator_domain::{EventFilter, TaskEvent, TaskEventType, TaskId};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// 为空时订阅所有任务
    pub task_id: Option<TaskId>,
}

fn event_name(event: &TaskEvent) -> &'static str {
    match event.event_type {
        TaskEventType::StatusChanged => "status_changed",
        TaskEventType::LogsUpdate => "logs_update",
        TaskEventType::Progress => "progress",
    }
}

/// 任务事件的 SSE 流，断线的客户端应重新读取任务状态
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = match query.task_id {
        Some(id) => EventFilter::Task(id),
        None => EventFilter::All,
    };
    debug!(?filter, "新的事件流订阅");

    let stream = state
        .events
        .subscribe(filter)
        .into_stream()
        .filter_map(|event| async move {
            match Event::default().event(event_name(&event)).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    warn!(task.id = event.task_id, error = %e, "序列化任务事件失败");
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
