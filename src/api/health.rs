use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::json;

/// Liveness probe. Degrades to `503` if the storage root is no longer
/// writable; the registry and scheduler are in-process and can't
/// independently fail while this handler itself is reachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let storage_ok = tokio::fs::metadata(&state.config.storage.root)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let status = if storage_ok { "ok" } else { "degraded" };
    let code = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "services": {
                "storage": if storage_ok { "ok" } else { "unavailable" },
                "registry": "ok",
                "scheduler": "ok",
            },
            "timestamp": Utc::now(),
        })),
    )
}
