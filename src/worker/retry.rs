//! Backoff for rate-limited generation calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how patiently the worker retries a rate-limited call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per message, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause after the first rate-limited attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on any computed pause
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive pauses
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Whether attempt number `attempt` (1-indexed) may be followed by another
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Pause after failed attempt `attempt`.
    ///
    /// Exponential in the attempt number and capped at `max_delay_ms`, but
    /// never shorter than the wait the backend `requested`.
    pub fn backoff(&self, attempt: u32, requested: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let computed = (self.base_delay_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay_ms as f64)
            .max(0.0);

        Duration::from_millis(computed as u64).max(requested)
    }
}
