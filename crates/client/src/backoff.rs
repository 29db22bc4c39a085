// crates/client/src/backoff.rs
//! Poll timing: the steady poll interval and exponential backoff after
//! transient failures.

use std::time::Duration;

/// Timing knobs for [`crate::PollMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first consecutive transient error.
    pub base: Duration,
    /// Upper bound for any backoff delay.
    pub cap: Duration,
    /// Delay between polls while everything is healthy.
    pub poll_interval: Duration,
    /// Consecutive transient errors tolerated. One more gives up.
    pub max_consecutive_errors: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_consecutive_errors: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the `errors`-th consecutive transient
    /// error: `min(base * 2^(errors - 1), cap)`. Zero errors means a normal
    /// poll.
    pub fn delay_for(&self, errors: u32) -> Duration {
        if errors == 0 {
            return self.poll_interval;
        }
        let factor = 1u32.checked_shl(errors - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether `errors` consecutive transient errors exhaust the budget.
    pub fn gives_up_after(&self, errors: u32) -> bool {
        errors > self.max_consecutive_errors
    }
}
