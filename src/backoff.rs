//! Reconnection scheduling: jittered exponential backoff under a retry budget.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// Computes reconnect delays and enforces the retry budget.
///
/// The delay for the n-th attempt is `min(base * 2^n, cap)` plus a uniform
/// jitter of up to ±`jitter` of that value. The attempt counter only resets
/// on a clean transition to Connected.
#[derive(Debug)]
pub struct ReconnectSchedule {
    base: Duration,
    cap: Duration,
    jitter: f64,
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectSchedule {
    pub fn new(base: Duration, cap: Duration, jitter: f64, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            jitter,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.backoff_base,
            config.backoff_cap,
            config.backoff_jitter,
            config.max_reconnect_attempts,
        )
    }

    /// Consume one attempt from the budget and return the delay to wait
    /// before it. Returns `None` once the budget is exhausted; no further
    /// attempt may be scheduled after that.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        let exp = self.base.as_millis() as f64 * 2f64.powi(self.attempts as i32);
        let capped = exp.min(self.cap.as_millis() as f64);
        let jitter = if self.jitter > 0.0 {
            let mut rng = rand::rng();
            rng.random_range(-1.0..=1.0) * self.jitter * capped
        } else {
            0.0
        };
        let delay_ms = (capped + jitter).max(0.0);

        self.attempts += 1;
        Some(Duration::from_millis(delay_ms as u64))
    }

    /// Give back an attempt that must not count against the budget.
    /// Used for permission denials, which are terminal for a single attempt
    /// but do not consume the budget.
    pub fn refund(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
    }

    /// Reset the counter. Called only on reaching Connected.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
