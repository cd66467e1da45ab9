use std::time::Duration;

use rand::Rng;

/// Exponential backoff for webhook redelivery: `2^n` minutes after the n-th
/// failed attempt (2, 4, 8, 16, ... minutes), with ±10% jitter so a burst of
/// failures does not come back as a synchronized burst of retries.
///
/// The test schedule drops the minute factor and the jitter (`2^n` seconds,
/// exact), which keeps integration tests fast and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    test_intervals: bool,
}

const JITTER: f64 = 0.10;

impl RetrySchedule {
    pub fn new(test_intervals: bool) -> Self { Self { test_intervals } }

    /// The un-jittered interval after failed attempt `attempt` (1-based).
    pub fn base_interval(&self, attempt: i32) -> Duration {
        // 2^30 s is ~34 years; anything above is already unreachable with
        // sane retry budgets
        let doubling = 1u64 << attempt.clamp(1, 30) as u32;
        let secs = if self.test_intervals {
            doubling
        } else {
            doubling * 60
        };
        Duration::from_secs(secs)
    }

    pub fn next_delay(&self, attempt: i32) -> Duration {
        let base = self.base_interval(attempt);
        if self.test_intervals {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        base.mul_f64(factor)
    }
}
