use crate::active::ActiveTaskSet;
use crate::queue::{QueueItem, TaskQueue};
use impose_registry::{RegistryError, StatusUpdateFields, Task, TaskRegistry, TaskStatus};
use impose_storage::Storage;
use std::sync::Arc;

/// Control-plane operations the API layer drives directly (enqueue on
/// upload, cancel/retry/delete/start on their respective endpoints) — the
/// parts of the worker-pool contract that don't run inside the worker loop
/// itself.
pub struct Scheduler {
    registry: Arc<dyn TaskRegistry>,
    storage: Arc<Storage>,
    queue: Arc<TaskQueue>,
    active: Arc<ActiveTaskSet>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("queue is at capacity")]
    Backpressure,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] impose_storage::StorageError),
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        storage: Arc<Storage>,
        queue: Arc<TaskQueue>,
        active: Arc<ActiveTaskSet>,
    ) -> Self {
        Self {
            registry,
            storage,
            queue,
            active,
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Enqueues a freshly created (already `queued` in the registry) task.
    /// On backpressure the caller is expected to have not yet committed any
    /// uploaded files, or to roll them back.
    pub async fn enqueue(&self, task_id: &str, session_id: &str) -> Result<(), ScheduleError> {
        self.queue
            .try_enqueue(QueueItem {
                task_id: task_id.to_string(),
                session_id: session_id.to_string(),
            })
            .await
            .map_err(|_| ScheduleError::Backpressure)
    }

    /// Cancels a task. `queued` tasks are pulled straight off the queue;
    /// `processing` tasks are signalled cooperatively and the worker itself
    /// finishes the transition. A task already in a terminal state is a
    /// no-op; its current status is simply reported back.
    pub async fn cancel(&self, task_id: &str, session_id: &str) -> Result<Task, ScheduleError> {
        let task = self.registry.get_for_session(task_id, session_id).await?;
        match task.status {
            TaskStatus::Queued => {
                self.queue.remove(task_id).await;
                let task = self
                    .registry
                    .update_status(
                        task_id,
                        &[TaskStatus::Queued],
                        TaskStatus::Cancelled,
                        StatusUpdateFields {
                            stage: Some("cancelled".to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.storage.purge(session_id, task_id).await?;
                Ok(task)
            }
            TaskStatus::Processing => {
                self.active.request_cancel(task_id).await;
                // The worker observes the flag at the next page boundary and
                // performs the CAS itself; report the pre-cancel snapshot.
                Ok(task)
            }
            _ => Ok(task),
        }
    }

    /// Resets a `failed` task to `queued` and re-enqueues it, reusing its
    /// original `input_refs`.
    pub async fn retry(&self, task_id: &str, session_id: &str) -> Result<Task, ScheduleError> {
        let task = self
            .registry
            .update_status(
                task_id,
                &[TaskStatus::Failed],
                TaskStatus::Queued,
                StatusUpdateFields {
                    stage: Some("queued".to_string()),
                    error_kind: None,
                    error_message: None,
                    reset_progress_and_bump_retry: true,
                    ..Default::default()
                },
            )
            .await?;
        self.enqueue(task_id, session_id).await?;
        Ok(task)
    }

    /// Re-enqueues a task that is `queued` but was never picked up (e.g. the
    /// queue was rebuilt after a restart). Idempotent with respect to the
    /// registry; a no-op from the registry's perspective, only touches D.
    pub async fn start(&self, task_id: &str, session_id: &str) -> Result<Task, ScheduleError> {
        let task = self.registry.get_for_session(task_id, session_id).await?;
        if task.status == TaskStatus::Queued {
            self.enqueue(task_id, session_id).await?;
        }
        Ok(task)
    }

    /// Purges a task's record and all its storage objects. If the task is
    /// currently being worked on, it is cancelled first.
    pub async fn delete(&self, task_id: &str, session_id: &str) -> Result<(), ScheduleError> {
        let task = self.registry.get_for_session(task_id, session_id).await?;
        if task.status == TaskStatus::Processing {
            self.active.request_cancel(task_id).await;
        }
        self.queue.remove(task_id).await;
        self.storage.purge(session_id, task_id).await?;
        self.registry.delete(task_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use impose_registry::InMemoryTaskRegistry;

    fn harness() -> (Scheduler, Arc<dyn TaskRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry: Arc<dyn TaskRegistry> =
            Arc::new(InMemoryTaskRegistry::new(impose_registry::TtlConfig::default()));
        let storage = Arc::new(Storage::new(dir.path().to_path_buf()));
        let queue = Arc::new(TaskQueue::new(8, false));
        let active = Arc::new(ActiveTaskSet::new());
        (
            Scheduler::new(registry.clone(), storage, queue, active),
            registry,
            dir,
        )
    }

    #[tokio::test]
    async fn cancel_queued_task_removes_from_queue_and_registry() {
        let (scheduler, registry, _dir) = harness();
        let task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        registry.create(task).await.unwrap();
        scheduler.enqueue("t1", "s1").await.unwrap();

        let cancelled = scheduler.cancel("t1", "s1").await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(scheduler.queue().len().await, 0);
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_on_terminal_tasks() {
        let (scheduler, registry, _dir) = harness();
        let mut task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        task.status = TaskStatus::Completed;
        registry.create(task).await.unwrap();

        let reported = scheduler.cancel("t1", "s1").await.unwrap();
        assert_eq!(reported.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn retry_resets_failed_task_to_queued_and_reenqueues() {
        let (scheduler, registry, _dir) = harness();
        let task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        registry.create(task).await.unwrap();
        registry
            .update_status(
                "t1",
                &[TaskStatus::Queued],
                TaskStatus::Failed,
                StatusUpdateFields {
                    error_kind: Some("timeout".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let retried = scheduler.retry("t1", "s1").await.unwrap();
        assert_eq!(retried.status, TaskStatus::Queued);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(scheduler.queue().len().await, 1);
    }

    #[tokio::test]
    async fn retry_rejects_a_task_that_is_not_failed() {
        let (scheduler, registry, _dir) = harness();
        let task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        registry.create(task).await.unwrap();

        let err = scheduler.retry("t1", "s1").await.unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Registry(RegistryError::StaleState { .. })
        ));
    }

    #[tokio::test]
    async fn delete_purges_registry_and_queue() {
        let (scheduler, registry, _dir) = harness();
        let task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        registry.create(task).await.unwrap();
        scheduler.enqueue("t1", "s1").await.unwrap();

        scheduler.delete("t1", "s1").await.unwrap();
        assert!(registry.get("t1").await.is_err());
        assert_eq!(scheduler.queue().len().await, 0);
    }

    #[tokio::test]
    async fn cross_session_access_is_reported_as_not_found() {
        let (scheduler, registry, _dir) = harness();
        let task = Task::new("t1".into(), "s1".into(), 1, Utc::now());
        registry.create(task).await.unwrap();

        let err = scheduler.cancel("t1", "someone-else").await.unwrap_err();
        assert!(matches!(err, ScheduleError::Registry(RegistryError::NotFound)));
    }
}
