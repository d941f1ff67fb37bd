use impose_registry::InMemoryTaskRegistry;
use impose_scheduler::{Pool, PoolConfig, WorkerConfig};
use impose_service::config::Config;
use impose_service::state::AppState;
use impose_service::build_router;
use impose_storage::{Storage, ZipLimits};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    tracing::info!("starting imposition service");

    let config = Config::load()?;
    tracing::info!("configuration loaded");

    tokio::fs::create_dir_all(&config.storage.root).await?;
    let storage = Arc::new(Storage::new(config.storage.root.clone()));
    let retention = chrono::Duration::seconds(config.retention().as_secs() as i64);
    let ttl_config = impose_registry::TtlConfig {
        completed: retention,
        failed: retention,
        expired: retention,
        cancelled: retention,
    };
    let registry: Arc<dyn impose_registry::TaskRegistry> =
        Arc::new(InMemoryTaskRegistry::new(ttl_config));

    let worker_config = WorkerConfig {
        resource_limits: impose_imposition::ResourceLimits {
            max_total_input_bytes: config.limits.max_total_input_bytes,
        },
        zip_limits: ZipLimits {
            max_ratio: config.limits.zip_max_ratio,
            max_total_bytes: config.limits.zip_max_total_bytes,
        },
        soft_time_limit: config.soft_time_limit(),
        hard_time_limit: config.hard_time_limit(),
        ..Default::default()
    };

    let pool = Arc::new(Pool::spawn(
        registry.clone(),
        storage.clone(),
        PoolConfig {
            worker_count: config.concurrency.worker_count,
            queue_capacity: config.concurrency.queue_capacity,
            fair_scheduling: config.concurrency.fair_scheduling,
            cleanup_interval: config.cleanup_interval(),
            retention: config.retention(),
            worker: worker_config,
        },
    ));

    let drain_timeout = config.drain_timeout();
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(registry, storage, pool.clone(), config);

    let app = build_router(app_state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown(drain_timeout).await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,impose_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
