//! Bounded retry with a fixed backoff table.

use std::time::Duration;

/// Default delays after the 1st, 2nd and 3rd failed dispatch.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How many failed dispatches an operation survives, and how long to wait after each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// No delays between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, vec![Duration::ZERO])
    }

    /// Delay before the next attempt of an operation that has failed `retry_count` times.
    ///
    /// Counts past the end of the table reuse the last entry; an empty table
    /// means no delay.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let index = retry_count.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// True once an operation has failed as often as the policy allows.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}
