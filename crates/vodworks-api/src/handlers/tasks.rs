use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use vodworks_core::events::{topics, TaskEvent};
use vodworks_core::models::{Priority, Task, TaskResponse, TaskStatus, TranscodeProfile};
use vodworks_core::SchedulerError;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitTaskRequest {
    #[validate(length(min = 1, message = "source must not be empty"))]
    pub source: String,
    #[validate(length(min = 1, max = 16, message = "1 to 16 profiles required"))]
    pub profiles: Vec<TranscodeProfile>,
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    request
        .validate()
        .map_err(|e| SchedulerError::Validation(e.to_string()))?;

    let priority = request
        .priority
        .map(Priority::new)
        .unwrap_or_default();
    let max_retries = request
        .max_retries
        .unwrap_or(state.config.default_max_retries);
    let task = Task::new(request.source, request.profiles, priority, max_retries);

    // The queue announces `task.submitted` itself, ahead of worker pickup.
    let id = state.queue.enqueue(task).await?;
    tracing::info!(task_id = %id, "Task submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": TaskStatus::Pending })),
    ))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.store.get(id).await?;
    Ok(Json(task.into()))
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Json<Vec<TaskResponse>> {
    let tasks = state
        .store
        .list(query.status, query.limit.unwrap_or(50))
        .await;
    Json(tasks.into_iter().map(TaskResponse::from).collect())
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.store.cancel(id).await?;
    publish_task_event(
        &state,
        topics::TASK_CANCELLED,
        TaskEvent::new(id, TaskStatus::Cancelled, None),
    )
    .await;
    tracing::info!(task_id = %id, "Task cancelled");
    Ok(Json(task.into()))
}

async fn publish_task_event(state: &AppState, topic: &str, event: TaskEvent) {
    match serde_json::to_value(&event) {
        Ok(payload) => {
            if let Err(e) = state.bus.publish(topic, payload).await {
                tracing::warn!(topic = topic, error = %e, "Event publish failed");
            }
        }
        Err(e) => tracing::warn!(topic = topic, error = %e, "Event serialization failed"),
    }
}
