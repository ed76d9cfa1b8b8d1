//! Reconnect backoff for the consumer loop.

use crate::config::{DEFAULT_RECONNECT_BACKOFF_INITIAL_MS, DEFAULT_RECONNECT_BACKOFF_MAX_MS};
use std::time::Duration;

/// Exponential backoff: starts at `initial`, doubles after every failure and
/// is capped at `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_INITIAL_MS),
            Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MAX_MS),
        )
    }
}
