use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

const LOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Counters {
    succeeded: usize,
    failed: usize,
    last_logged: Option<Instant>,
}

/// Shared success/failure counters; logs at most once per interval.
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    started: Instant,
    interval: Duration,
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self::with_interval(total, LOG_INTERVAL)
    }

    pub fn with_interval(total: usize, interval: Duration) -> Self {
        Self {
            total,
            started: Instant::now(),
            interval,
            counters: Mutex::new(Counters {
                succeeded: 0,
                failed: 0,
                last_logged: None,
            }),
        }
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    /// `(succeeded, failed)` so far.
    pub fn counts(&self) -> (usize, usize) {
        let counters = self.lock();
        (counters.succeeded, counters.failed)
    }

    pub fn finish(&self) {
        let counters = self.lock();
        info!(
            succeeded = counters.succeeded,
            failed = counters.failed,
            total = self.total,
            elapsed_secs = self.started.elapsed().as_secs_f64(),
            "upload run finished"
        );
    }

    fn record(&self, success: bool) {
        let mut counters = self.lock();
        if success {
            counters.succeeded += 1;
        } else {
            counters.failed += 1;
        }
        let now = Instant::now();
        let due = counters
            .last_logged
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return;
        }
        counters.last_logged = Some(now);

        let done = counters.succeeded + counters.failed;
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        let remaining = self.total.saturating_sub(done);
        let eta_secs = if rate > 0.0 {
            (remaining as f64 / rate).round() as u64
        } else {
            0
        };
        info!(
            done,
            total = self.total,
            succeeded = counters.succeeded,
            failed = counters.failed,
            rate_per_sec = (rate * 100.0).round() / 100.0,
            eta_secs,
            "upload progress"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
