//! Backoff for reconnect loops

use std::time::Duration;

/// Exponential backoff with optional jitter
///
/// Delays double from `base` on every attempt and are capped at `max`.
/// Jitter is deterministic (golden-ratio sequence over the attempt number)
/// so retries stay reproducible in tests.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: 0.0,
            attempt: 0,
        }
    }

    /// Set jitter factor (0.0 - 1.0).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Get the next backoff duration
    pub fn next_backoff(&mut self) -> Duration {
        let backoff = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt.min(31)));
        let capped = backoff.min(self.max);
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return capped;
        }

        let jitter_range = capped.as_secs_f64() * self.jitter;
        let jitter_offset = (attempt as f64 * 0.618033988749895) % 1.0;
        let adjusted = capped.as_secs_f64() + jitter_range * (jitter_offset * 2.0 - 1.0);
        Duration::from_secs_f64(adjusted.max(0.0)).min(self.max)
    }

    /// Reset the backoff
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
