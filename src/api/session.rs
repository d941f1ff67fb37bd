use crate::session::{generate_session_id, SESSION_HEADER};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    session_id: String,
    created_at: chrono::DateTime<Utc>,
    expires_in_hours: u64,
}

const ADVISORY_EXPIRY_HOURS: u64 = 24 * 30;

/// Bootstraps a session: echoes a client-supplied id back, or mints a fresh
/// one. The server holds no state of its own for the session; this endpoint
/// exists purely so a first-time client has something to send as
/// `X-Session-ID` on every subsequent request.
pub async fn bootstrap(headers: HeaderMap) -> Json<SessionResponse> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_session_id);

    Json(SessionResponse {
        session_id,
        created_at: Utc::now(),
        expires_in_hours: ADVISORY_EXPIRY_HOURS,
    })
}
