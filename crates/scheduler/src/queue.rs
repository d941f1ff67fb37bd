use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};

/// One ready-to-run task id, tagged with its owning session for fair
/// scheduling.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub task_id: String,
    pub session_id: String,
}

#[derive(Debug, thiserror::Error)]
#[error("queue is at capacity")]
pub struct QueueFullError;

struct State {
    fifo: VecDeque<QueueItem>,
    /// Per-session pending ids, used only when fair scheduling is enabled.
    per_session: HashMap<String, VecDeque<QueueItem>>,
    /// Rotation of sessions with at least one pending item.
    session_order: VecDeque<String>,
    len: usize,
}

/// Bounded FIFO queue of ready task ids. With `fair_scheduling`
/// off, dequeue order is pure FIFO; on, dequeue round-robins across sessions
/// so one session's large batch cannot starve another's.
pub struct TaskQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    fair_scheduling: bool,
}

impl TaskQueue {
    pub fn new(capacity: usize, fair_scheduling: bool) -> Self {
        Self {
            state: Mutex::new(State {
                fifo: VecDeque::new(),
                per_session: HashMap::new(),
                session_order: VecDeque::new(),
                len: 0,
            }),
            notify: Notify::new(),
            capacity,
            fair_scheduling,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len
    }

    /// Admits `item`, rejecting with `QueueFullError` at the configured
    /// high-water mark.
    pub async fn try_enqueue(&self, item: QueueItem) -> Result<(), QueueFullError> {
        let mut state = self.state.lock().await;
        if state.len >= self.capacity {
            return Err(QueueFullError);
        }
        if self.fair_scheduling {
            let session_id = item.session_id.clone();
            let queue = state.per_session.entry(session_id.clone()).or_default();
            if queue.is_empty() {
                state.session_order.push_back(session_id);
            }
            state.per_session.get_mut(&item.session_id).unwrap().push_back(item);
        } else {
            state.fifo.push_back(item);
        }
        state.len += 1;
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for and removes the next ready item. `None` only once shutdown
    /// has been signalled externally and the caller stops polling.
    pub async fn dequeue(&self) -> QueueItem {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(item) = self.pop_locked(&mut state) {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes a specific queued (not yet dequeued) task, e.g. on cancel of
    /// a `queued` task. Returns `true` if it was found and removed.
    pub async fn remove(&self, task_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if self.fair_scheduling {
            let mut found = false;
            for queue in state.per_session.values_mut() {
                let before = queue.len();
                queue.retain(|item| item.task_id != task_id);
                if queue.len() != before {
                    found = true;
                }
            }
            state.session_order.retain(|s| {
                state
                    .per_session
                    .get(s)
                    .map(|q| !q.is_empty())
                    .unwrap_or(false)
            });
            if found {
                state.len -= 1;
            }
            found
        } else {
            let before = state.fifo.len();
            state.fifo.retain(|item| item.task_id != task_id);
            let found = state.fifo.len() != before;
            if found {
                state.len -= 1;
            }
            found
        }
    }

    fn pop_locked(&self, state: &mut State) -> Option<QueueItem> {
        if self.fair_scheduling {
            let session_id = state.session_order.pop_front()?;
            let queue = state.per_session.get_mut(&session_id)?;
            let item = queue.pop_front();
            if !queue.is_empty() {
                state.session_order.push_back(session_id.clone());
            }
            if queue.is_empty() {
                state.per_session.remove(&session_id);
            }
            if item.is_some() {
                state.len -= 1;
            }
            item
        } else {
            let item = state.fifo.pop_front();
            if item.is_some() {
                state.len -= 1;
            }
            item
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, session: &str) -> QueueItem {
        QueueItem {
            task_id: id.to_string(),
            session_id: session.to_string(),
        }
    }

    #[tokio::test]
    async fn fifo_mode_preserves_enqueue_order() {
        let q = TaskQueue::new(10, false);
        q.try_enqueue(item("a", "s1")).await.unwrap();
        q.try_enqueue(item("b", "s1")).await.unwrap();
        assert_eq!(q.dequeue().await.task_id, "a");
        assert_eq!(q.dequeue().await.task_id, "b");
    }

    #[tokio::test]
    async fn rejects_enqueue_past_capacity() {
        let q = TaskQueue::new(1, false);
        q.try_enqueue(item("a", "s1")).await.unwrap();
        assert!(q.try_enqueue(item("b", "s1")).await.is_err());
    }

    #[tokio::test]
    async fn fair_scheduling_round_robins_across_sessions() {
        let q = TaskQueue::new(10, true);
        q.try_enqueue(item("a1", "s1")).await.unwrap();
        q.try_enqueue(item("a2", "s1")).await.unwrap();
        q.try_enqueue(item("b1", "s2")).await.unwrap();

        // s1 had two queued first, but round-robin interleaves s2 before a2.
        assert_eq!(q.dequeue().await.task_id, "a1");
        assert_eq!(q.dequeue().await.task_id, "b1");
        assert_eq!(q.dequeue().await.task_id, "a2");
    }

    #[tokio::test]
    async fn remove_drops_a_still_queued_item() {
        let q = TaskQueue::new(10, false);
        q.try_enqueue(item("a", "s1")).await.unwrap();
        q.try_enqueue(item("b", "s1")).await.unwrap();
        assert!(q.remove("a").await);
        assert!(!q.remove("a").await);
        assert_eq!(q.dequeue().await.task_id, "b");
    }

    #[tokio::test]
    async fn dequeue_waits_until_an_item_is_enqueued() {
        let q = std::sync::Arc::new(TaskQueue::new(10, false));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.dequeue().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.try_enqueue(item("a", "s1")).await.unwrap();
        let got = handle.await.unwrap();
        assert_eq!(got.task_id, "a");
    }
}
