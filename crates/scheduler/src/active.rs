use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-task cooperative cancel flag, checked at page boundaries by the
/// imposition engine's progress callback.
#[derive(Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks task ids currently held by a worker. The sweeper consults this to
/// skip any subtree whose task is in flight, and cancel-while-processing
/// consults it to find the flag to flip.
#[derive(Default)]
pub struct ActiveTaskSet {
    inner: RwLock<HashMap<String, CancelFlag>>,
}

impl ActiveTaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, task_id: &str) -> CancelFlag {
        let flag = CancelFlag::new();
        self.inner.write().await.insert(task_id.to_string(), flag.clone());
        flag
    }

    pub async fn release(&self, task_id: &str) {
        self.inner.write().await.remove(task_id);
    }

    /// Flags `task_id` for cooperative cancellation if it is currently being
    /// worked on. Returns `true` if a worker holds the task (the caller need
    /// not itself transition the record; the worker will on its next check).
    pub async fn request_cancel(&self, task_id: &str) -> bool {
        match self.inner.read().await.get(task_id) {
            Some(flag) => {
                flag.set();
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self) -> HashSet<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}
