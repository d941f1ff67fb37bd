use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    files_removed: u64,
    bytes_removed: u64,
    tasks_expired: u64,
}

/// Forces an out-of-band sweep rather than waiting for the periodic timer.
/// Runs the identical pass the background sweeper runs, so there is no
/// separate "administrative" cleanup code path to drift out of sync.
pub async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let report = state
        .pool
        .sweeper
        .run_once()
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "administrative cleanup sweep failed");
            Default::default()
        });
    Json(CleanupResponse {
        files_removed: report.files_removed,
        bytes_removed: report.bytes_removed,
        tasks_expired: report.tasks_expired,
    })
}
