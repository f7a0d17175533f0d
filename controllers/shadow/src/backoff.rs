//! # Exponential Backoff
//!
//! Per-key retry delays for the work queue.
//! The delay doubles with every consecutive failure of the same key and is
//! capped, so a key that keeps failing settles at a steady retry rate instead
//! of hammering the API server.
//!
//! Defaults match the conventional controller rate limiter:
//! 5ms, 10ms, 20ms, ... capped at 1000s.

use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default upper bound on any retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Stateless: the caller tracks how many times a key has failed and asks for
/// the delay belonging to that attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay for attempt 0
    base: Duration,
    /// Delay cap
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base delay and cap
    ///
    /// # Arguments
    ///
    /// * `base` - Delay returned for the first failure (attempt 0)
    /// * `max` - Maximum delay ever returned
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay for the given zero-indexed attempt: `min(base * 2^attempt, max)`
    ///
    /// Saturates instead of overflowing for very large attempt counts.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay before the first retry.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Upper bound on any delay.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
