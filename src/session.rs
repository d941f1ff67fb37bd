use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rand::RngCore;

pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_QUERY_PARAM: &str = "session";

/// An opaque, server-unverified session tag. The server never authenticates
/// it, only tags records with it and refuses cross-tag access by reporting
/// `NotFound` uniformly for both "no such task" and "not your task".
pub struct SessionId(pub String);

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(SESSION_HEADER) {
            let s = value.to_str().map_err(|_| ApiError::MissingSession)?;
            if !s.is_empty() {
                return Ok(SessionId(s.to_string()));
            }
        }
        // Downloads accept the session as a query parameter to support
        // inline framing (an <iframe>/<img> src can't set request headers).
        if let Some(query) = parts.uri.query() {
            for pair in query.split('&') {
                if let Some(value) = pair.strip_prefix(&format!("{SESSION_QUERY_PARAM}=")) {
                    if !value.is_empty() {
                        return Ok(SessionId(value.to_string()));
                    }
                }
            }
        }
        Err(ApiError::MissingSession)
    }
}

/// Generates a cryptographically random session id: 32 bytes of OS entropy,
/// hex-encoded.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
