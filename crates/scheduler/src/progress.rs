use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Smoothed progress-rate estimate for one task. The source material's
/// "expected_remaining_seconds" is computed from an unspecified rate
/// estimator; this implements an EWMA over successive `(progress, time)`
/// samples, which is a reasonable, simple choice among the family the
/// upstream description gestures at — not itself load-bearing.
struct RateEstimator {
    last_sample: Option<(DateTime<Utc>, u8)>,
    ewma_per_minute: Option<f64>,
}

const EWMA_ALPHA: f64 = 0.3;

impl RateEstimator {
    fn new() -> Self {
        Self {
            last_sample: None,
            ewma_per_minute: None,
        }
    }

    fn record(&mut self, progress: u8, now: DateTime<Utc>) {
        if let Some((last_time, last_progress)) = self.last_sample {
            let elapsed_minutes = (now - last_time).num_milliseconds() as f64 / 60_000.0;
            if elapsed_minutes > 0.0 && progress > last_progress {
                let instantaneous = (progress - last_progress) as f64 / elapsed_minutes;
                self.ewma_per_minute = Some(match self.ewma_per_minute {
                    Some(prev) => EWMA_ALPHA * instantaneous + (1.0 - EWMA_ALPHA) * prev,
                    None => instantaneous,
                });
            }
        }
        self.last_sample = Some((now, progress));
    }
}

/// Per-task rate trackers, shared between the worker that reports progress
/// and the API handler that serves the rich progress projection.
#[derive(Default)]
pub struct RateTracker {
    inner: RwLock<HashMap<String, RateEstimator>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, task_id: &str, progress: u8, now: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner
            .entry(task_id.to_string())
            .or_insert_with(RateEstimator::new)
            .record(progress, now);
    }

    /// Estimated `(rate_per_minute, remaining_seconds)` given the task's
    /// current progress. `None` if too little history has accumulated yet.
    pub async fn estimate(&self, task_id: &str, current_progress: u8) -> Option<(f64, u64)> {
        let inner = self.inner.read().await;
        let rate = inner.get(task_id)?.ewma_per_minute?;
        if rate <= 0.0 {
            return None;
        }
        let remaining_progress = (100u32).saturating_sub(current_progress as u32) as f64;
        let remaining_minutes = remaining_progress / rate;
        Some((rate, (remaining_minutes * 60.0).round() as u64))
    }

    pub async fn clear(&self, task_id: &str) {
        self.inner.write().await.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn no_estimate_before_two_samples() {
        let tracker = RateTracker::new();
        tracker.record("t1", 10, Utc::now()).await;
        assert!(tracker.estimate("t1", 10).await.is_none());
    }

    #[tokio::test]
    async fn estimates_remaining_time_from_observed_rate() {
        let tracker = RateTracker::new();
        let t0 = Utc::now();
        tracker.record("t1", 10, t0).await;
        tracker.record("t1", 20, t0 + Duration::minutes(1)).await;
        let (rate, remaining) = tracker.estimate("t1", 20).await.unwrap();
        assert!((rate - 10.0).abs() < 1e-6);
        // 80 points left at 10/min == 8 minutes == 480s.
        assert_eq!(remaining, 480);
    }

    #[tokio::test]
    async fn clear_drops_history() {
        let tracker = RateTracker::new();
        let t0 = Utc::now();
        tracker.record("t1", 10, t0).await;
        tracker.record("t1", 20, t0 + Duration::minutes(1)).await;
        tracker.clear("t1").await;
        assert!(tracker.estimate("t1", 20).await.is_none());
    }
}
