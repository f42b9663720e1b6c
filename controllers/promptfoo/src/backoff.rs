//! # Fibonacci Backoff
//!
//! Requeue delays for PromptFooConfigs whose reconciliation keeps failing.
//! Delays grow along the Fibonacci sequence in minutes (1m, 1m, 2m, 3m, 5m,
//! 8m) and stop at the configured maximum.

use std::time::Duration;

/// Fibonacci backoff calculator, stepped once per failed pass.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value in minutes
    prev_minutes: u64,
    /// Current backoff value in minutes
    current_minutes: u64,
    /// Maximum backoff value in minutes
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_minutes` and capped at `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay, advancing the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);

        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);

        delay
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}
