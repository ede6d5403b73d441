//! Exponential retry schedule with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff: starts at `min_delay`, multiplies per failure, caps
/// at `max_delay`. Each returned delay carries +-12.5% jitter so a fleet of
/// clients does not retry in lockstep.
#[derive(Debug)]
pub struct RetrySchedule {
    config: RetryConfig,
    current: Duration,
}

impl RetrySchedule {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let current = config.min_delay;
        Self { config, current }
    }

    /// Returns the jittered delay for the next retry, then advances.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self
            .current
            .mul_f64(self.config.multiplier)
            .min(self.config.max_delay);
        jittered(base)
    }

    /// Restores the schedule to its minimum (a pass succeeded).
    pub fn reset(&mut self) {
        self.current = self.config.min_delay;
    }

    /// The un-jittered delay the next call will be based on.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.875..=1.125);
    base.mul_f64(factor)
}
