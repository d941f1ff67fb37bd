use crate::error::{ApiError, Result};
use crate::session::SessionId;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use impose_registry::{Statistics, Task, TaskStatus};
use serde::{Deserialize, Serialize};

/// Full record projection served by both the single-task status endpoint
/// and the list endpoint's `tasks[]` entries.
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(rename = "taskId")]
    task_id: String,
    status: TaskStatus,
    progress: u8,
    stage: String,
    #[serde(rename = "fileCount")]
    file_count: usize,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "downloadUrls", skip_serializing_if = "Option::is_none")]
    download_urls: Option<Vec<String>>,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    error_kind: Option<String>,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(rename = "retryCount")]
    retry_count: u32,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let download_urls = if task.status == TaskStatus::Completed {
            Some(
                task.output_refs
                    .iter()
                    .filter_map(|p| {
                        std::path::Path::new(p)
                            .file_name()
                            .map(|n| format!("/api/download/{}/{}", task.task_id, n.to_string_lossy()))
                    })
                    .collect(),
            )
        } else {
            None
        };
        Self {
            task_id: task.task_id,
            status: task.status,
            progress: task.progress,
            stage: task.stage,
            file_count: task.file_count,
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
            download_urls,
            error_kind: task.error_kind,
            error_message: task.error_message,
            retry_count: task.retry_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    tasks: Vec<TaskView>,
    total_count: usize,
    session_id: String,
}

fn parse_status(raw: &str) -> Result<TaskStatus> {
    match raw {
        "queued" => Ok(TaskStatus::Queued),
        "processing" => Ok(TaskStatus::Processing),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "expired" => Ok(TaskStatus::Expired),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(ApiError::BadRequest(format!("unknown status filter: {other}"))),
    }
}

pub async fn list(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let tasks = state.registry.list(&session_id, status).await;
    let total_count = tasks.len();
    Ok(Json(ListResponse {
        tasks: tasks.into_iter().map(TaskView::from).collect(),
        total_count,
        session_id,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>> {
    let task = state.registry.get_for_session(&task_id, &session_id).await?;
    Ok(Json(TaskView::from(task)))
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    task_id: String,
    progress: u8,
    status: TaskStatus,
    stage: String,
    estimated_remaining_seconds: Option<u64>,
    estimated_completion_at: Option<DateTime<Utc>>,
    progress_rate_per_minute: Option<f64>,
}

pub async fn progress(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let task = state.registry.get_for_session(&task_id, &session_id).await?;
    let estimate = state.pool.rate_tracker.estimate(&task_id, task.progress).await;
    let now = Utc::now();
    Ok(Json(ProgressResponse {
        task_id: task.task_id,
        progress: task.progress,
        status: task.status,
        stage: task.stage,
        estimated_remaining_seconds: estimate.map(|(_, secs)| secs),
        estimated_completion_at: estimate.map(|(_, secs)| now + chrono::Duration::seconds(secs as i64)),
        progress_rate_per_minute: estimate.map(|(rate, _)| rate),
    }))
}

#[derive(Debug, Serialize)]
pub struct StatusOnly {
    status: TaskStatus,
}

pub async fn start(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<StatusOnly>> {
    let task = state.pool.scheduler.start(&task_id, &session_id).await?;
    Ok(Json(StatusOnly { status: task.status }))
}

pub async fn cancel(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<StatusOnly>> {
    // For a `processing` task this reports the pre-cancel snapshot: the
    // worker performs the actual CAS to `Cancelled` asynchronously at its
    // next page boundary, so `status` here is the intent, not yet confirmed.
    let task = state.pool.scheduler.cancel(&task_id, &session_id).await?;
    state.pool.rate_tracker.clear(&task_id).await;
    Ok(Json(StatusOnly { status: task.status }))
}

pub async fn retry(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<StatusOnly>> {
    let task = state.pool.scheduler.retry(&task_id, &session_id).await?;
    state.pool.rate_tracker.clear(&task_id).await;
    Ok(Json(StatusOnly { status: task.status }))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    files_cleaned: bool,
}

pub async fn delete(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path(task_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.pool.scheduler.delete(&task_id, &session_id).await?;
    state.pool.rate_tracker.clear(&task_id).await;
    Ok(Json(DeleteResponse { files_cleaned: true }))
}

pub async fn statistics(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
) -> Json<Statistics> {
    Json(state.registry.statistics(&session_id).await)
}
