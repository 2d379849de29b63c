//! Poll interval policy for resource steps

use std::time::Duration;

/// Exponential backoff with a ceiling, plus the overall await timeout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first inconclusive poll
    pub initial_interval: Duration,
    /// Upper bound for any single delay
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Default time a resource may spend awaiting completion
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: Duration::from_secs(3600),
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max;
        self
    }

    /// Delay after the `attempt`-th inconclusive poll (zero based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as usize) as i32);
        if !factor.is_finite() {
            return self.max_interval;
        }

        let delay = self.initial_interval.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        self.initial_interval.mul_f64(factor)
    }
}
