use crate::error::RegistryError;
use crate::models::{Statistics, Task, TaskStatus};
use crate::ttl::TtlConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Fields a status transition may also set, alongside the new status itself.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdateFields {
    pub stage: Option<String>,
    pub output_refs: Option<Vec<String>>,
    pub input_refs: Option<Vec<String>>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Retry resets progress to 0 and bumps `retry_count`.
    pub reset_progress_and_bump_retry: bool,
}

/// Task registry abstraction: keyed get/put, a session secondary index,
/// atomic CAS status transitions, and per-key TTLs. Grounded on
/// `pdf_service/src/jobs/queue.rs`'s `JobQueue` trait, generalized from a
/// Postgres-backed single-job-per-row store to an in-process one, adequate
/// for a single-instance deployment.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    async fn create(&self, task: Task) -> Result<(), RegistryError>;

    /// Raw lookup, no ownership check. Used by workers and the sweeper.
    async fn get(&self, task_id: &str) -> Result<Task, RegistryError>;

    /// Ownership-checked lookup: a session mismatch is reported identically
    /// to a missing id, so no oracle distinguishes the two cases.
    async fn get_for_session(&self, task_id: &str, session_id: &str) -> Result<Task, RegistryError> {
        let task = self.get(task_id).await?;
        if task.session_id != session_id {
            return Err(RegistryError::NotFound);
        }
        Ok(task)
    }

    async fn list(&self, session_id: &str, status: Option<TaskStatus>) -> Vec<Task>;

    async fn update_status(
        &self,
        task_id: &str,
        expected_from: &[TaskStatus],
        to: TaskStatus,
        fields: StatusUpdateFields,
    ) -> Result<Task, RegistryError>;

    async fn update_progress(&self, task_id: &str, new_progress: u8, stage: &str);

    async fn delete(&self, task_id: &str) -> Result<(), RegistryError>;

    async fn statistics(&self, session_id: &str) -> Statistics;
}

struct Entry {
    task: Task,
    expires_at: Option<DateTime<Utc>>,
}

struct Inner {
    tasks: HashMap<String, Entry>,
    session_index: HashMap<String, HashSet<String>>,
}

/// In-process `TaskRegistry`. A single-instance deployment's reference store;
/// a Redis/Postgres-backed implementation is a drop-in swap behind
/// the same trait.
pub struct InMemoryTaskRegistry {
    inner: RwLock<Inner>,
    ttl: TtlConfig,
}

impl InMemoryTaskRegistry {
    pub fn new(ttl: TtlConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                session_index: HashMap::new(),
            }),
            ttl,
        }
    }

    /// Removes `task_id` if its TTL has passed. Must be called with the write
    /// lock already held.
    fn expire_if_due(inner: &mut Inner, task_id: &str, now: DateTime<Utc>) {
        let expired = inner
            .tasks
            .get(task_id)
            .and_then(|e| e.expires_at)
            .map(|at| now >= at)
            .unwrap_or(false);
        if expired {
            if let Some(entry) = inner.tasks.remove(task_id) {
                if let Some(ids) = inner.session_index.get_mut(&entry.task.session_id) {
                    ids.remove(task_id);
                }
            }
        }
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create(&self, task: Task) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.task_id) {
            return Err(RegistryError::AlreadyExists);
        }
        inner
            .session_index
            .entry(task.session_id.clone())
            .or_default()
            .insert(task.task_id.clone());
        inner.tasks.insert(
            task.task_id.clone(),
            Entry {
                task,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Task, RegistryError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, task_id, now);
        inner
            .tasks
            .get(task_id)
            .map(|e| e.task.clone())
            .ok_or(RegistryError::NotFound)
    }

    async fn list(&self, session_id: &str, status: Option<TaskStatus>) -> Vec<Task> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = inner
            .session_index
            .get(session_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            Self::expire_if_due(&mut inner, id, now);
        }
        let mut tasks: Vec<Task> = inner
            .session_index
            .get(session_id)
            .map(|s| {
                s.iter()
                    .filter_map(|id| inner.tasks.get(id).map(|e| e.task.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    async fn update_status(
        &self,
        task_id: &str,
        expected_from: &[TaskStatus],
        to: TaskStatus,
        fields: StatusUpdateFields,
    ) -> Result<Task, RegistryError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, task_id, now);

        let entry = inner.tasks.get_mut(task_id).ok_or(RegistryError::NotFound)?;

        // A terminal status is final: the only way to match `expected_from`
        // from a terminal state is if the caller explicitly expects it, which
        // no transition in this registry does, so terminal states never move.
        if !expected_from.contains(&entry.task.status) {
            return Err(RegistryError::StaleState {
                expected: expected_from.to_vec(),
                actual: entry.task.status,
            });
        }

        let task = &mut entry.task;
        task.status = to;
        task.updated_at = now;
        if fields.reset_progress_and_bump_retry {
            task.progress = 0;
            task.retry_count += 1;
        }
        if to == TaskStatus::Completed {
            task.progress = 100;
        }
        if let Some(stage) = fields.stage {
            task.stage = stage;
        }
        if let Some(refs) = fields.output_refs {
            task.output_refs = refs;
        }
        if let Some(refs) = fields.input_refs {
            task.input_refs = refs;
        }
        if let Some(kind) = fields.error_kind {
            task.error_kind = Some(kind);
        }
        if let Some(msg) = fields.error_message {
            task.error_message = Some(msg);
        }
        if let Some(completed_at) = fields.completed_at {
            task.completed_at = Some(completed_at);
        }

        let result = task.clone();
        entry.expires_at = self.ttl.ttl_for(to).map(|d| now + d);
        Ok(result)
    }

    async fn update_progress(&self, task_id: &str, new_progress: u8, stage: &str) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, task_id, now);
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            tracing::debug!(%task_id, "update_progress on unknown or expired task, ignored");
            return;
        };
        if entry.task.status.is_terminal() {
            tracing::debug!(%task_id, status = %entry.task.status, "update_progress on terminal task, ignored");
            return;
        }
        if new_progress <= entry.task.progress {
            tracing::debug!(
                %task_id,
                current = entry.task.progress,
                attempted = new_progress,
                "update_progress ignored: not monotonically increasing"
            );
            return;
        }
        entry.task.progress = new_progress;
        entry.task.stage = stage.to_string();
        entry.task.updated_at = now;
    }

    async fn delete(&self, task_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner.tasks.remove(task_id).ok_or(RegistryError::NotFound)?;
        if let Some(ids) = inner.session_index.get_mut(&entry.task.session_id) {
            ids.remove(task_id);
        }
        Ok(())
    }

    async fn statistics(&self, session_id: &str) -> Statistics {
        let tasks = self.list(session_id, None).await;
        let mut stats = Statistics::default();
        let mut completion_seconds = Vec::new();
        for task in &tasks {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => {
                    stats.completed += 1;
                    if let Some(completed_at) = task.completed_at {
                        completion_seconds
                            .push((completed_at - task.created_at).num_milliseconds() as f64 / 1000.0);
                    }
                }
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Expired => stats.expired += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        if !completion_seconds.is_empty() {
            stats.average_completion_seconds =
                Some(completion_seconds.iter().sum::<f64>() / completion_seconds.len() as f64);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registry() -> InMemoryTaskRegistry {
        InMemoryTaskRegistry::new(TtlConfig::default())
    }

    fn new_task(id: &str, session: &str) -> Task {
        Task::new(id.to_string(), session.to_string(), 2, Utc::now())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        let task = reg.get("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.session_id, "s1");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        let err = reg.create(new_task("t1", "s1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists));
    }

    #[tokio::test]
    async fn get_for_session_hides_cross_session_tasks() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        let err = reg.get_for_session("t1", "s2").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
        assert!(reg.get_for_session("t1", "s1").await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_session_and_status() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.create(new_task("t2", "s1")).await.unwrap();
        reg.create(new_task("t3", "s2")).await.unwrap();
        reg.update_status(
            "t2",
            &[TaskStatus::Queued],
            TaskStatus::Processing,
            StatusUpdateFields::default(),
        )
        .await
        .unwrap();

        let all_s1 = reg.list("s1", None).await;
        assert_eq!(all_s1.len(), 2);

        let queued_s1 = reg.list("s1", Some(TaskStatus::Queued)).await;
        assert_eq!(queued_s1.len(), 1);
        assert_eq!(queued_s1[0].task_id, "t1");
    }

    #[tokio::test]
    async fn update_status_rejects_unexpected_prior_state() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        let err = reg
            .update_status(
                "t1",
                &[TaskStatus::Processing],
                TaskStatus::Completed,
                StatusUpdateFields::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::StaleState { .. }));
    }

    #[tokio::test]
    async fn completed_transition_forces_progress_to_100() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.update_status(
            "t1",
            &[TaskStatus::Queued],
            TaskStatus::Processing,
            StatusUpdateFields::default(),
        )
        .await
        .unwrap();
        reg.update_progress("t1", 40, "composing").await;
        let task = reg
            .update_status(
                "t1",
                &[TaskStatus::Processing],
                TaskStatus::Completed,
                StatusUpdateFields {
                    output_refs: Some(vec!["out.pdf".to_string()]),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(task.progress, 100);
        assert_eq!(task.output_refs, vec!["out.pdf".to_string()]);
    }

    #[tokio::test]
    async fn terminal_status_is_final_against_later_transitions() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.update_status(
            "t1",
            &[TaskStatus::Queued],
            TaskStatus::Cancelled,
            StatusUpdateFields::default(),
        )
        .await
        .unwrap();
        reg.update_progress("t1", 90, "composing").await;
        let task = reg.get("t1").await.unwrap();
        assert_eq!(task.progress, 0);
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn update_progress_ignores_non_increasing_values() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.update_status(
            "t1",
            &[TaskStatus::Queued],
            TaskStatus::Processing,
            StatusUpdateFields::default(),
        )
        .await
        .unwrap();
        reg.update_progress("t1", 50, "composing").await;
        reg.update_progress("t1", 30, "composing").await;
        let task = reg.get("t1").await.unwrap();
        assert_eq!(task.progress, 50);
    }

    #[tokio::test]
    async fn delete_removes_from_session_index() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.delete("t1").await.unwrap();
        assert!(reg.get("t1").await.is_err());
        assert!(reg.list("s1", None).await.is_empty());
        assert!(matches!(
            reg.delete("t1").await.unwrap_err(),
            RegistryError::NotFound
        ));
    }

    #[tokio::test]
    async fn ttl_expiry_removes_record_and_session_index_entry_lazily() {
        let reg = InMemoryTaskRegistry::new(TtlConfig {
            completed: Duration::milliseconds(-1),
            ..TtlConfig::default()
        });
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.update_status(
            "t1",
            &[TaskStatus::Queued],
            TaskStatus::Completed,
            StatusUpdateFields {
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // TTL already elapsed: the next read observes the record as gone.
        assert!(reg.get("t1").await.is_err());
        assert!(reg.list("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn statistics_counts_by_status_and_averages_completion_time() {
        let reg = registry();
        reg.create(new_task("t1", "s1")).await.unwrap();
        reg.create(new_task("t2", "s1")).await.unwrap();
        reg.update_status(
            "t1",
            &[TaskStatus::Queued],
            TaskStatus::Completed,
            StatusUpdateFields {
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let stats = reg.statistics("s1").await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queued, 1);
        assert!(stats.average_completion_seconds.is_some());
    }
}
