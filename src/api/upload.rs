use crate::error::{ApiError, Result};
use crate::session::SessionId;
use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use impose_storage::{detect_kind, FileKind};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "taskId")]
    task_id: String,
    status: &'static str,
    #[serde(rename = "fileCount")]
    file_count: usize,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UploadLimits {
    max_file_size: u64,
    max_total_input_bytes: u64,
    max_files_per_upload: usize,
    allowed_extensions: [&'static str; 2],
}

/// Upload-limits discovery, read straight from the loaded configuration so
/// it can never drift from the values actually enforced below.
pub async fn limits(State(state): State<AppState>) -> Json<UploadLimits> {
    Json(UploadLimits {
        max_file_size: state.config.limits.max_file_size,
        max_total_input_bytes: state.config.limits.max_total_input_bytes,
        max_files_per_upload: state.config.limits.max_files_per_upload,
        allowed_extensions: ["pdf", "zip"],
    })
}

/// Accepts a multipart batch of PDFs/ZIPs, stores them under the session's
/// subtree, records one task for the whole batch, and enqueues it. Files are
/// validated by content (magic bytes), never by the client-declared
/// filename extension or `Content-Type`.
///
/// On any failure after files start landing on disk — a bad file, a storage
/// error, or scheduler backpressure — everything written for this batch is
/// purged and no task record survives; the caller sees a clean rejection.
pub async fn upload(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let task_id = Uuid::new_v4().to_string();
    let mut input_refs = Vec::new();
    let mut ordinal = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let declared_name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("file-{ordinal}"));

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => {
                let _ = state.storage.purge(&session_id, &task_id).await;
                return Err(ApiError::BadRequest(e.to_string()));
            }
        };

        if data.is_empty() {
            let _ = state.storage.purge(&session_id, &task_id).await;
            return Err(ApiError::BadRequest(format!("{declared_name} is empty")));
        }
        if data.len() as u64 > state.config.limits.max_file_size {
            let _ = state.storage.purge(&session_id, &task_id).await;
            return Err(ApiError::PayloadTooLarge(
                data.len() as u64,
                state.config.limits.max_file_size,
            ));
        }
        if matches!(detect_kind(&data), FileKind::Unknown) {
            let _ = state.storage.purge(&session_id, &task_id).await;
            return Err(ApiError::UnsupportedMediaType(declared_name));
        }
        if ordinal >= state.config.limits.max_files_per_upload {
            let _ = state.storage.purge(&session_id, &task_id).await;
            return Err(ApiError::BadRequest(
                "too many files in one batch".to_string(),
            ));
        }

        let declared_len = data.len() as u64;
        let stored = state
            .storage
            .store_upload(
                &session_id,
                &task_id,
                ordinal,
                &declared_name,
                tokio::io::BufReader::new(data.as_ref()),
                Some(declared_len),
                state.config.limits.max_file_size,
            )
            .await;
        match stored {
            Ok(path) => input_refs.push(path.to_string_lossy().into_owned()),
            Err(e) => {
                let _ = state.storage.purge(&session_id, &task_id).await;
                return Err(e.into());
            }
        }
        ordinal += 1;
    }

    if input_refs.is_empty() {
        return Err(ApiError::BadRequest("no files in upload".to_string()));
    }

    let now = Utc::now();
    let mut task = impose_registry::Task::new(task_id.clone(), session_id.clone(), input_refs.len(), now);
    task.input_refs = input_refs;
    let file_count = task.file_count;

    state.registry.create(task).await.map_err(|e| {
        ApiError::Internal(e.to_string())
    })?;

    if let Err(e) = state.pool.scheduler.enqueue(&task_id, &session_id).await {
        let _ = state.registry.delete(&task_id).await;
        let _ = state.storage.purge(&session_id, &task_id).await;
        return Err(e.into());
    }

    Ok(Json(UploadResponse {
        task_id,
        status: "queued",
        file_count,
        created_at: now,
    }))
}
