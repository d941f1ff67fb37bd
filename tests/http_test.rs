use axum::body::Body;
use axum::http::{Request, StatusCode};
use impose_registry::InMemoryTaskRegistry;
use impose_scheduler::{Pool, PoolConfig};
use impose_service::config::{Config, ConcurrencyConfig, LimitsConfig, ServerConfig, StorageConfig};
use impose_service::state::AppState;
use impose_storage::Storage;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(root: std::path::PathBuf) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        storage: StorageConfig { root },
        concurrency: ConcurrencyConfig {
            worker_count: 1,
            queue_capacity: 8,
            fair_scheduling: false,
            cleanup_interval_hours: 6,
            retention_hours: 24,
            soft_time_limit_seconds: 60,
            hard_time_limit_seconds: 120,
            drain_timeout_seconds: 1,
        },
        limits: LimitsConfig {
            max_file_size: 1024 * 1024,
            max_total_input_bytes: 8 * 1024 * 1024,
            max_files_per_upload: 10,
            zip_max_ratio: 100.0,
            zip_max_total_bytes: 8 * 1024 * 1024,
        },
    }
}

async fn test_state(dir: &TempDir) -> AppState {
    let config = test_config(dir.path().to_path_buf());
    let storage = Arc::new(Storage::new(dir.path().to_path_buf()));
    let registry: Arc<dyn impose_registry::TaskRegistry> =
        Arc::new(InMemoryTaskRegistry::new(impose_registry::TtlConfig::default()));
    let pool = Arc::new(Pool::spawn(
        registry.clone(),
        storage.clone(),
        PoolConfig {
            worker_count: config.concurrency.worker_count,
            queue_capacity: config.concurrency.queue_capacity,
            fair_scheduling: false,
            cleanup_interval: config.cleanup_interval(),
            retention: config.retention(),
            ..Default::default()
        },
    ));
    AppState::new(registry, storage, pool, config)
}

#[tokio::test]
async fn health_check_reports_ok_when_storage_root_exists() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_bootstrap_mints_an_id_when_none_supplied() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["session_id"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn upload_without_session_header_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let body = "--X\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.pdf\"\r\n\r\n%PDF-1.4\r\n--X--\r\n";
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .header("content-type", "multipart/form-data; boundary=X")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_rejects_a_file_that_is_not_pdf_or_zip_by_content() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let body = "--X\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.txt\"\r\n\r\nhello world\r\n--X--\r\n";
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .header("content-type", "multipart/form-data; boundary=X")
                .header("x-session-id", "session-a")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // Nothing should have been left on disk for the rejected batch.
    let uploads_root = dir.path().join("uploads").join("session-a");
    assert!(!uploads_root.exists() || std::fs::read_dir(&uploads_root).unwrap().next().is_none());
}

#[tokio::test]
async fn status_for_unknown_task_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/task/does-not-exist/status")
                .header("x-session-id", "session-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_accepts_session_via_query_parameter() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    // No session header, no matching task either way; what matters here is
    // that the query-parameter fallback is consulted at all instead of the
    // request being rejected outright for missing a session.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/download/does-not-exist/result.pdf?session=session-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn statistics_reports_zeroed_counts_for_an_unseen_session() {
    let dir = TempDir::new().unwrap();
    let app = impose_service::build_router(test_state(&dir).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/task/statistics")
                .header("x-session-id", "session-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["queued"], 0);
    assert_eq!(json["completed"], 0);
}
