use std::time::Duration;

use rand::Rng;

/// Per-target retry schedule.
///
/// Delays grow as `backoff_base * 2^attempt`, capped at `backoff_cap`, with
/// half-jitter: the actual delay lands uniformly in the upper half of the
/// computed window so concurrent retries spread out without ever collapsing
/// to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Total attempts including the first: `max_retries + 1`.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// The sleep before retry number `attempt + 1` (zero-based failed
    /// attempt index).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1 << attempt.min(16));
        let capped = exp.min(self.backoff_cap);
        let millis = capped.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        let jittered = millis / 2 + rand::thread_rng().gen_range(0..=millis / 2);
        Duration::from_millis(jittered)
    }
}
