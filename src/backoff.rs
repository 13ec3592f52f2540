//! Reconnect backoff policy
//!
//! Exponential delay with a cap and reset-on-success, kept free of I/O so the
//! schedule can be checked on its own.

use std::time::Duration;

/// Initial reconnect delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum reconnect delay in milliseconds
pub const MAX_BACKOFF_MS: u64 = 30_000;

pub const BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(INITIAL_BACKOFF_MS),
            multiplier: BACKOFF_MULTIPLIER,
            max: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            ..Default::default()
        }
    }

    /// Delay for the given zero-based attempt without tracking state.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt.min(31));
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.initial.min(self.max),
            attempts: 0,
        }
    }
}

/// Running backoff state for one retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);
        self.current = self
            .current
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
        self.attempts = 0;
    }

    /// Delay the next failure will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
