use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status. The DAG of legal transitions lives in
/// `TaskRegistry::update_status`, not here — this type only names the states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Expired | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Expired => "expired",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// The central task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub stage: String,
    pub file_count: usize,
    pub input_refs: Vec<String>,
    pub output_refs: Vec<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl Task {
    pub fn new(task_id: String, session_id: String, file_count: usize, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            session_id,
            status: TaskStatus::Queued,
            progress: 0,
            stage: "queued".to_string(),
            file_count,
            input_refs: Vec::new(),
            output_refs: Vec::new(),
            error_kind: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            retry_count: 0,
        }
    }
}

/// Per-session aggregate counts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub average_completion_seconds: Option<f64>,
}
