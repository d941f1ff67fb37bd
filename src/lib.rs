pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;

/// Assembles the full route table over `state`. One `Router::new()` with
/// every route wired directly, `TraceLayer` + CORS applied once at the top,
/// `with_state` last. Each handler does its own ownership/session checks via
/// the `SessionId` extractor, so there's no separate auth-middleware-guarded
/// sub-router the way a static-API-key service would need.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api::health::health_check))
        .route("/api/session", post(api::session::bootstrap))
        .route("/api/upload", post(api::upload::upload))
        .route("/api/upload/limits", get(api::upload::limits))
        .route("/api/task", get(api::task::list))
        .route("/api/task/statistics", get(api::task::statistics))
        .route("/api/task/:id/status", get(api::task::status))
        .route("/api/task/:id/progress", get(api::task::progress))
        .route("/api/task/:id/start", post(api::task::start))
        .route("/api/task/:id/cancel", post(api::task::cancel))
        .route("/api/task/:id/retry", post(api::task::retry))
        .route("/api/task/:id", axum::routing::delete(api::task::delete))
        .route(
            "/api/download/:id/:name",
            get(api::download::download).head(api::download::head),
        )
        .route("/api/cleanup", post(api::cleanup::cleanup))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
