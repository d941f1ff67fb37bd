use crate::active::{ActiveTaskSet, CancelFlag};
use crate::error::ErrorKind;
use crate::progress::RateTracker;
use crate::queue::{QueueItem, TaskQueue};
use chrono::Utc;
use impose_imposition::{compose, Input, LayoutConfig, ResourceLimits};
use impose_registry::{StatusUpdateFields, TaskRegistry, TaskStatus};
use impose_storage::{detect_kind, FileKind, Storage, StorageError, ZipLimits};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub layout: LayoutConfig,
    pub resource_limits: ResourceLimits,
    pub zip_limits: ZipLimits,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    pub progress_coalesce_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            resource_limits: ResourceLimits::default(),
            zip_limits: ZipLimits::default(),
            soft_time_limit: Duration::from_secs(55 * 60),
            hard_time_limit: Duration::from_secs(60 * 60),
            progress_coalesce_interval: Duration::from_millis(500),
        }
    }
}

enum Failure {
    Cancelled,
    Timeout,
    Error(ErrorKind, String),
}

fn classify_storage_err(err: StorageError) -> Failure {
    match err {
        StorageError::ZipBomb => Failure::Error(ErrorKind::Oversize, err.to_string()),
        StorageError::ZipSlip | StorageError::BadName => {
            Failure::Error(ErrorKind::BadInput, err.to_string())
        }
        other => Failure::Error(ErrorKind::Internal, other.to_string()),
    }
}

/// Maps a page-fill fraction onto the worker-reported progress band, coalesced
/// into the [10, 95] range the scheduler reserves for the composing phase.
fn pin_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 10;
    }
    let frac = done as f64 / total as f64;
    (10.0 + frac * 85.0).round().clamp(10.0, 95.0) as u8
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Processes one task from dequeue through a terminal status. Grounded on
/// `pdf_service/src/jobs/worker.rs`'s `process_next_job`, generalized from a
/// single-template render to the multi-file imposition pipeline and extended
/// with cooperative cancel/soft/hard time limits the source job queue does
/// not need (it has no long-running per-task loop to interrupt).
pub struct Worker {
    worker_id: usize,
    registry: Arc<dyn TaskRegistry>,
    storage: Arc<Storage>,
    queue: Arc<TaskQueue>,
    active: Arc<ActiveTaskSet>,
    rate_tracker: Arc<RateTracker>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        worker_id: usize,
        registry: Arc<dyn TaskRegistry>,
        storage: Arc<Storage>,
        queue: Arc<TaskQueue>,
        active: Arc<ActiveTaskSet>,
        rate_tracker: Arc<RateTracker>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id,
            registry,
            storage,
            queue,
            active,
            rate_tracker,
            config,
        }
    }

    /// Runs until `shutdown` fires, then returns once any task currently in
    /// flight has reached a terminal state (the caller enforces the overall
    /// drain deadline across the whole worker pool).
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(worker_id = self.worker_id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(worker_id = self.worker_id, "worker stopping, no new tasks");
                        break;
                    }
                }
                item = self.queue.dequeue() => {
                    self.process_task(item).await;
                }
            }
        }
    }

    async fn process_task(&self, item: QueueItem) {
        let task_id = item.task_id.clone();

        let task = match self
            .registry
            .update_status(
                &task_id,
                &[TaskStatus::Queued],
                TaskStatus::Processing,
                StatusUpdateFields {
                    stage: Some("starting".to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(task) => task,
            Err(e) => {
                tracing::info!(%task_id, worker_id = self.worker_id, error = %e, "skipping: task no longer queued");
                return;
            }
        };

        let cancel_flag = self.active.acquire(&task_id).await;
        let outcome = self.run_pipeline(&task, cancel_flag).await;
        self.active.release(&task_id).await;
        self.rate_tracker.clear(&task_id).await;

        match outcome {
            Ok(output_path) => {
                let fields = StatusUpdateFields {
                    stage: Some("done".to_string()),
                    output_refs: Some(vec![output_path.to_string_lossy().into_owned()]),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                };
                match self
                    .registry
                    .update_status(&task_id, &[TaskStatus::Processing], TaskStatus::Completed, fields)
                    .await
                {
                    Ok(_) => tracing::info!(%task_id, worker_id = self.worker_id, "task completed"),
                    Err(e) => tracing::warn!(%task_id, error = %e, "completed but lost the status race"),
                }
            }
            Err(Failure::Cancelled) => {
                if let Err(e) = self.storage.purge(&task.session_id, &task_id).await {
                    tracing::warn!(%task_id, error = %e, "purge after cancel failed");
                }
                let fields = StatusUpdateFields {
                    stage: Some("cancelled".to_string()),
                    input_refs: Some(Vec::new()),
                    output_refs: Some(Vec::new()),
                    ..Default::default()
                };
                if let Err(e) = self
                    .registry
                    .update_status(&task_id, &[TaskStatus::Processing], TaskStatus::Cancelled, fields)
                    .await
                {
                    tracing::info!(%task_id, error = %e, "cancel status race lost (already terminal)");
                }
            }
            Err(Failure::Timeout) => {
                let fields = StatusUpdateFields {
                    stage: Some("failed".to_string()),
                    error_kind: Some(ErrorKind::Timeout.as_str().to_string()),
                    error_message: Some(format!(
                        "exceeded hard time limit of {:?}",
                        self.config.hard_time_limit
                    )),
                    ..Default::default()
                };
                let _ = self
                    .registry
                    .update_status(&task_id, &[TaskStatus::Processing], TaskStatus::Failed, fields)
                    .await;
            }
            Err(Failure::Error(kind, message)) => {
                tracing::warn!(%task_id, worker_id = self.worker_id, %message, "task failed");
                let fields = StatusUpdateFields {
                    stage: Some("failed".to_string()),
                    error_kind: Some(kind.as_str().to_string()),
                    error_message: Some(message),
                    ..Default::default()
                };
                let _ = self
                    .registry
                    .update_status(&task_id, &[TaskStatus::Processing], TaskStatus::Failed, fields)
                    .await;
            }
        }
    }

    async fn report(&self, task_id: &str, progress: u8, stage: &str) {
        self.registry.update_progress(task_id, progress, stage).await;
        self.rate_tracker.record(task_id, progress, Utc::now()).await;
    }

    async fn run_pipeline(
        &self,
        task: &impose_registry::Task,
        cancel_flag: CancelFlag,
    ) -> Result<PathBuf, Failure> {
        self.report(&task.task_id, 5, "extracting").await;

        let mut inputs = Vec::new();
        for path in &task.input_refs {
            if cancel_flag.is_set() {
                return Err(Failure::Cancelled);
            }
            let path = PathBuf::from(path);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Failure::Error(ErrorKind::Internal, e.to_string()))?;
            match detect_kind(&bytes) {
                FileKind::Pdf => inputs.push(Input {
                    name: file_name(&path),
                    bytes,
                }),
                FileKind::Zip => {
                    let extracted = self
                        .storage
                        .extract_archive(&task.task_id, bytes, self.config.zip_limits)
                        .await
                        .map_err(classify_storage_err)?;
                    for entry in extracted {
                        let entry_bytes = tokio::fs::read(&entry)
                            .await
                            .map_err(|e| Failure::Error(ErrorKind::Internal, e.to_string()))?;
                        inputs.push(Input {
                            name: file_name(&entry),
                            bytes: entry_bytes,
                        });
                    }
                }
                FileKind::Unknown => {}
            }
        }

        self.report(&task.task_id, 10, "composing").await;

        let shared_progress = Arc::new(AsyncMutex::new((0usize, 1usize)));
        let result = self.compose_with_progress(task, inputs, cancel_flag, shared_progress).await;

        let bytes = match result {
            ComposeOutcome::Timeout => return Err(Failure::Timeout),
            ComposeOutcome::JoinError(msg) => return Err(Failure::Error(ErrorKind::Internal, msg)),
            ComposeOutcome::Failed(kind, msg) => return Err(Failure::Error(kind, msg)),
            ComposeOutcome::Cancelled => return Err(Failure::Cancelled),
            ComposeOutcome::Done(bytes) => bytes,
        };

        self.report(&task.task_id, 97, "writing output").await;
        self.storage
            .store_output(&task.session_id, &task.task_id, "result.pdf", &bytes)
            .await
            .map_err(|e| Failure::Error(ErrorKind::Internal, e.to_string()))
    }

    async fn compose_with_progress(
        &self,
        task: &impose_registry::Task,
        inputs: Vec<Input>,
        cancel_flag: CancelFlag,
        shared_progress: Arc<AsyncMutex<(usize, usize)>>,
    ) -> ComposeOutcome {
        let pump_progress = shared_progress.clone();
        let registry = self.registry.clone();
        let rate_tracker = self.rate_tracker.clone();
        let task_id = task.task_id.clone();
        let coalesce_interval = self.config.progress_coalesce_interval;

        let pump = tokio::spawn(async move {
            let mut last_reported = 10u8;
            let mut ticker = tokio::time::interval(coalesce_interval);
            loop {
                ticker.tick().await;
                let (done, total) = *pump_progress.lock().await;
                let pct = pin_progress(done, total);
                if pct > last_reported {
                    registry.update_progress(&task_id, pct, "composing").await;
                    rate_tracker.record(&task_id, pct, Utc::now()).await;
                    last_reported = pct;
                }
            }
        });

        let soft_task_id = task.task_id.clone();
        let soft_limit = self.config.soft_time_limit;
        let soft_watch = tokio::spawn(async move {
            tokio::time::sleep(soft_limit).await;
            tracing::warn!(task_id = %soft_task_id, "soft time limit exceeded, continuing until hard limit");
        });

        let layout = self.config.layout;
        let limits = self.config.resource_limits;
        let progress_cell = shared_progress.clone();
        let compose_cancel = cancel_flag.clone();
        let blocking = tokio::task::spawn_blocking(move || {
            compose(&inputs, &layout, limits, |done, total| {
                if let Ok(mut guard) = progress_cell.try_lock() {
                    *guard = (done, total);
                }
                !compose_cancel.is_set()
            })
        });

        let outcome = match tokio::time::timeout(self.config.hard_time_limit, blocking).await {
            Err(_elapsed) => ComposeOutcome::Timeout,
            Ok(Err(join_err)) => ComposeOutcome::JoinError(join_err.to_string()),
            Ok(Ok(Err(impose_err))) => {
                let kind = ErrorKind::from(&impose_err);
                if kind == ErrorKind::Cancelled {
                    ComposeOutcome::Cancelled
                } else {
                    ComposeOutcome::Failed(kind, impose_err.to_string())
                }
            }
            Ok(Ok(Ok(bytes))) => ComposeOutcome::Done(bytes),
        };

        pump.abort();
        soft_watch.abort();
        outcome
    }
}

enum ComposeOutcome {
    Done(Vec<u8>),
    Cancelled,
    Timeout,
    JoinError(String),
    Failed(ErrorKind, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_progress_stays_in_the_composing_band() {
        assert_eq!(pin_progress(0, 10), 10);
        assert_eq!(pin_progress(10, 10), 95);
        assert_eq!(pin_progress(5, 10), 53);
    }

    #[test]
    fn pin_progress_handles_empty_total() {
        assert_eq!(pin_progress(0, 0), 10);
    }

    #[test]
    fn file_name_extracts_the_final_component() {
        assert_eq!(file_name(std::path::Path::new("/a/b/c.pdf")), "c.pdf");
    }

    #[test]
    fn classify_storage_err_maps_zip_bomb_to_oversize() {
        let failure = classify_storage_err(StorageError::ZipBomb);
        assert!(matches!(failure, Failure::Error(ErrorKind::Oversize, _)));
    }
}
