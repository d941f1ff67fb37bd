//! Scheduler / worker pool: a bounded FIFO (optionally
//! fair-scheduling) queue, a fixed pool of workers that run the imposition
//! pipeline per task, cooperative cancellation, soft/hard time limits, and
//! the periodic storage sweep. Grounded on `pdf_service/src/jobs/worker.rs`,
//! generalized from a poll-on-ticker single-template render loop to an
//! event-driven multi-stage pipeline over an in-process queue.

mod active;
mod control;
mod error;
mod progress;
mod queue;
mod sweeper;
mod worker;

pub use active::{ActiveTaskSet, CancelFlag};
pub use control::{ScheduleError, Scheduler};
pub use error::ErrorKind;
pub use progress::RateTracker;
pub use queue::{QueueItem, TaskQueue};
pub use sweeper::{SweepReport, Sweeper};
pub use worker::{Worker, WorkerConfig};

use impose_registry::TaskRegistry;
use impose_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Concurrency knobs for a running pool; mirrors the environment variables
/// the HTTP service reads at startup.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub fair_scheduling: bool,
    pub cleanup_interval: Duration,
    pub retention: Duration,
    pub worker: WorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            fair_scheduling: false,
            cleanup_interval: Duration::from_secs(6 * 3600),
            retention: Duration::from_secs(24 * 3600),
            worker: WorkerConfig::default(),
        }
    }
}

/// A running pool: the shared scheduler handle the API layer enqueues and
/// cancels through, plus a shutdown coordinator for graceful drain.
pub struct Pool {
    pub scheduler: Arc<Scheduler>,
    pub rate_tracker: Arc<RateTracker>,
    pub active: Arc<ActiveTaskSet>,
    pub sweeper: Arc<Sweeper>,
    shutdown: tokio::sync::watch::Sender<bool>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl Pool {
    /// Builds the pool and spawns its workers and sweeper as background
    /// tasks tracked in a `JoinSet`, coordinated for graceful shutdown by
    /// a broadcast signal plus joining every worker handle.
    pub fn spawn(registry: Arc<dyn TaskRegistry>, storage: Arc<Storage>, config: PoolConfig) -> Self {
        let queue = Arc::new(TaskQueue::new(config.queue_capacity, config.fair_scheduling));
        let active = Arc::new(ActiveTaskSet::new());
        let rate_tracker = Arc::new(RateTracker::new());
        let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);

        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            storage.clone(),
            queue.clone(),
            active.clone(),
        ));
        let sweeper = Arc::new(Sweeper::new(
            storage.clone(),
            registry.clone(),
            active.clone(),
            config.retention,
        ));

        let mut tasks = JoinSet::new();
        for worker_id in 0..config.worker_count {
            let worker = Arc::new(Worker::new(
                worker_id,
                registry.clone(),
                storage.clone(),
                queue.clone(),
                active.clone(),
                rate_tracker.clone(),
                config.worker,
            ));
            let shutdown_rx = shutdown_rx.clone();
            tasks.spawn(async move { worker.run(shutdown_rx).await });
        }
        {
            let sweeper = sweeper.clone();
            let shutdown_rx = shutdown_rx.clone();
            let interval = config.cleanup_interval;
            tasks.spawn(async move { sweeper.run(interval, shutdown_rx).await });
        }

        tracing::info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            fair_scheduling = config.fair_scheduling,
            "scheduler pool started"
        );

        Self {
            scheduler,
            rate_tracker,
            active,
            sweeper,
            shutdown,
            tasks: tokio::sync::Mutex::new(tasks),
        }
    }

    /// Signals shutdown and waits up to `drain_deadline` for workers and the
    /// sweeper to stop. Anything still in flight past the deadline is left
    /// running; the caller (component E) is responsible for CAS-failing any
    /// task still `processing` at that point with `error_kind = Shutdown`.
    pub async fn shutdown(&self, drain_deadline: Duration) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(drain_deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("drain deadline elapsed with workers still running");
        }
    }
}
