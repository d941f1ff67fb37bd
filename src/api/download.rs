use crate::error::{ApiError, Result};
use crate::session::SessionId;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use impose_registry::TaskStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    inline: bool,
}

/// Ownership and freshness are both checked before a single byte is read:
/// the task must belong to the caller's session, and if the sweep already
/// reclaimed its output (task demoted to `expired`), a plain `NotFound`
/// would be misleading — the client's own earlier `status` poll may have
/// shown `completed`, so this is reported with a distinct code.
async fn authorize(state: &AppState, session_id: &str, task_id: &str) -> Result<()> {
    let task = state.registry.get_for_session(task_id, session_id).await?;
    if task.status == TaskStatus::Expired {
        return Err(ApiError::FilesExpired);
    }
    Ok(())
}

pub async fn download(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path((task_id, name)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    authorize(&state, &session_id, &task_id).await?;
    let bytes = state.storage.open_for_read(&session_id, &task_id, &name).await?;

    let disposition = if query.inline {
        format!("inline; filename=\"{name}\"")
    } else {
        format!("attachment; filename=\"{name}\"")
    };

    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

pub async fn head(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Path((task_id, name)): Path<(String, String)>,
) -> Result<Response> {
    authorize(&state, &session_id, &task_id).await?;
    let size = state.storage.stat_for_read(&session_id, &task_id, &name).await?;

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&size.to_string()).expect("decimal digits are valid header bytes"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
