use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// Closed error taxonomy for the HTTP surface. Mirrors
/// `pdf_service::error::ServiceError`'s one-enum-per-status-family shape,
/// extended with the input-shape/access/resource kinds a stateless job API
/// needs that a template-rendering service doesn't.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing session header")]
    MissingSession,
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("payload too large: {0} bytes exceeds the {1} byte limit")]
    PayloadTooLarge(u64, u64),
    #[error("not found")]
    NotFound,
    #[error("the requested files were already reclaimed by the retention sweep")]
    FilesExpired,
    #[error("queue is at capacity")]
    Backpressure,
    #[error("internal error")]
    Internal(String),

    #[error(transparent)]
    Registry(#[from] impose_registry::RegistryError),
    #[error(transparent)]
    Storage(#[from] impose_storage::StorageError),
}

impl From<impose_scheduler::ScheduleError> for ApiError {
    fn from(err: impose_scheduler::ScheduleError) -> Self {
        match err {
            impose_scheduler::ScheduleError::Backpressure => ApiError::Backpressure,
            impose_scheduler::ScheduleError::Registry(e) => ApiError::Registry(e),
            impose_scheduler::ScheduleError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let internal = |e: &dyn std::fmt::Display| {
            tracing::error!(error = %e, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "an internal error occurred".to_string(),
            )
        };

        let (status, code, message) = match &self {
            ApiError::MissingSession => (
                StatusCode::UNAUTHORIZED,
                "MISSING_SESSION",
                self.to_string(),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),
            ApiError::UnsupportedMediaType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                self.to_string(),
            ),
            ApiError::PayloadTooLarge(..) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                self.to_string(),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::FilesExpired => (StatusCode::NOT_FOUND, "FILES_EXPIRED", self.to_string()),
            ApiError::Registry(impose_registry::RegistryError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "not found".to_string())
            }
            ApiError::Registry(impose_registry::RegistryError::AlreadyExists) => internal(&self),
            ApiError::Registry(impose_registry::RegistryError::StaleState { .. }) => (
                StatusCode::CONFLICT,
                "STALE_STATE",
                "task changed state concurrently, retry".to_string(),
            ),
            ApiError::Backpressure => (
                StatusCode::TOO_MANY_REQUESTS,
                "BACKPRESSURE",
                self.to_string(),
            ),
            ApiError::Storage(impose_storage::StorageError::NotFound)
            | ApiError::Storage(impose_storage::StorageError::PathEscape) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "not found".to_string())
            }
            ApiError::Storage(impose_storage::StorageError::TooLarge { limit }) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("upload exceeds the {limit} byte limit"),
            ),
            ApiError::Storage(
                impose_storage::StorageError::BadName | impose_storage::StorageError::LengthMismatch,
            ) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                "invalid upload".to_string(),
            ),
            ApiError::Storage(_) | ApiError::Internal(_) => internal(&self),
        };

        let body = Json(json!({
            "error": true,
            "code": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
