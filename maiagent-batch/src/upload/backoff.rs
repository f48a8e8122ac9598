use rand::Rng;
use std::time::Duration;

/// Linear retry delay: `base * attempt`, capped at `max`, optionally jittered.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    /// `attempt` is 1-based: the first retry waits `base`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let linear = base_ms.saturating_mul(u64::from(attempt.max(1))).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(0..=linear)
        } else {
            linear
        };
        Duration::from_millis(delay_ms)
    }
}
