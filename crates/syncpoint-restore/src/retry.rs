//! Bounded retry with exponential backoff for verify polling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Verification retry configuration. Polling is always bounded: a
/// subsystem that never answers fails the pipeline instead of hanging it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of poll attempts
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling on the per-attempt delay
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}
