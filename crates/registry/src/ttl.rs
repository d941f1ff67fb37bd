use crate::models::TaskStatus;
use chrono::Duration;

/// Per-status record retention after entering a terminal state. Expiry is
/// eventual: a reader that observes a record past its TTL treats it as gone,
/// same as one that was never created.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub completed: Duration,
    pub failed: Duration,
    pub expired: Duration,
    pub cancelled: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            completed: Duration::hours(24),
            failed: Duration::hours(24),
            expired: Duration::hours(6),
            cancelled: Duration::hours(6),
        }
    }
}

impl TtlConfig {
    /// `None` for non-terminal statuses: only terminal records carry a TTL.
    pub fn ttl_for(&self, status: TaskStatus) -> Option<Duration> {
        match status {
            TaskStatus::Completed => Some(self.completed),
            TaskStatus::Failed => Some(self.failed),
            TaskStatus::Expired => Some(self.expired),
            TaskStatus::Cancelled => Some(self.cancelled),
            TaskStatus::Queued | TaskStatus::Processing => None,
        }
    }
}
