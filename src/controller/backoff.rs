//! # Fibonacci Backoff
//!
//! Progressive retry delay for failed reconciliations. Grows more slowly than
//! exponential backoff so a flapping API server is not hammered, yet a
//! persistently broken instance settles at a bounded retry rate.
//!
//! The sequence is computed in minutes and handed out in seconds:
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//!
//! ```rust
//! use argocd_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 10);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 60);
//! assert_eq!(backoff.next_backoff_seconds(), 120);
//! assert_eq!(backoff.next_backoff_seconds(), 180);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_minutes`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// `min_minutes` is used for the first two delays, `max_minutes` caps the sequence
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Current delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);
        result_seconds
    }

    /// ```
    /// use argocd_operator::controller::backoff::FibonacciBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = FibonacciBackoff::new(1, 10);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
    /// ```
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful reconciliation
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}
