//! Reconnect delay schedule.

use std::time::Duration;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;

pub const MAX_DELAY: Duration = Duration::from_millis(MAX_DELAY_MS);

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(30s, 1s * 2^(attempt - 1))`.
pub fn next_delay(attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let millis = BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(millis.min(MAX_DELAY_MS))
}

/// Consecutive-failure counter for one downstream connection.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure; returns the attempt number and the delay to wait.
    pub fn next(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        (self.attempt, next_delay(self.attempt))
    }

    /// A connection succeeded.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
