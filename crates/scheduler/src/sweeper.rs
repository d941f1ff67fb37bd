use crate::active::ActiveTaskSet;
use impose_registry::{StatusUpdateFields, TaskRegistry, TaskStatus};
use impose_storage::{ObjectRole, Storage, StorageError};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Periodic storage sweep plus the completed-but-filesless-to-expired
/// demotion that follows it. Exposed as a plain callable so the same pass
/// can be driven by a timer or by an administrative trigger — no separate
/// code path for the two callers.
pub struct Sweeper {
    storage: Arc<Storage>,
    registry: Arc<dyn TaskRegistry>,
    active: Arc<ActiveTaskSet>,
    retention: Duration,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub files_removed: u64,
    pub bytes_removed: u64,
    pub tasks_expired: u64,
}

impl Sweeper {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<dyn TaskRegistry>,
        active: Arc<ActiveTaskSet>,
        retention: Duration,
    ) -> Self {
        Self {
            storage,
            registry,
            active,
            retention,
        }
    }

    /// Runs the periodic sweep loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("sweeper stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => tracing::info!(
                            files_removed = report.files_removed,
                            bytes_removed = report.bytes_removed,
                            tasks_expired = report.tasks_expired,
                            "sweep complete"
                        ),
                        Err(e) => tracing::error!(error = %e, "sweep failed"),
                    }
                }
            }
        }
    }

    /// One sweep pass: delete files older than the retention horizon, then
    /// demote any `completed` task among the affected set whose outputs are
    /// now entirely gone to `expired`.
    pub async fn run_once(&self) -> Result<SweepReport, StorageError> {
        let cutoff = SystemTime::now() - self.retention;
        let active = self.active.snapshot().await;
        let result = self.storage.sweep(cutoff, &active).await?;

        let mut tasks_expired = 0;
        for task_id in &result.affected_tasks {
            let Ok(task) = self.registry.get(task_id).await else {
                continue;
            };
            if task.status != TaskStatus::Completed {
                continue;
            }
            let objects = self
                .storage
                .list_objects(&task.session_id, task_id)
                .await
                .unwrap_or_default();
            let has_output = objects.iter().any(|o| o.role == ObjectRole::Output);
            if has_output {
                continue;
            }
            let fields = StatusUpdateFields {
                stage: Some("expired".to_string()),
                output_refs: Some(Vec::new()),
                ..Default::default()
            };
            if self
                .registry
                .update_status(task_id, &[TaskStatus::Completed], TaskStatus::Expired, fields)
                .await
                .is_ok()
            {
                tasks_expired += 1;
            }
        }

        Ok(SweepReport {
            files_removed: result.files_removed,
            bytes_removed: result.bytes_removed,
            tasks_expired,
        })
    }
}
