//! Error classes and the in-strategy backoff policy.

use std::time::Duration;

/// Closed set of error classes driving cascade policy (classes, not types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection reset, read timeout, 5xx, 429, truncated body: absorbed
    /// in-strategy up to the retry budget, then advances the cascade.
    Retryable,
    /// No progress within the stall threshold: advances the cascade
    /// immediately.
    Stalled,
    /// Remote changed under us: reset the partial file and restart at S1.
    ValidatorChanged,
    /// Final digest mismatched a known validator: reset and restart at S4.
    IntegrityFailed,
    /// The current strategy cannot proceed (e.g. 416 after probe): skip to
    /// the next applicable strategy.
    Unsupported,
    /// 401/403, disk full, permission denied: short-circuits to Failed.
    Fatal,
    /// Process-wide shutdown: checkpoint and stop.
    Interrupted,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff for in-strategy retries of retryable errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts within one strategy (including the first).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with the configured in-strategy budget.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Decide the next step for a 1-based `attempt` that failed with `class`.
    /// Only `Retryable` is ever retried in-strategy; everything else falls
    /// through to the cascade.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if class != ErrorClass::Retryable || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        let exp = 1u32 << attempt.saturating_sub(1).min(8);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}
