//! Retry policy for transient failures.
//!
//! Only read-only requests are ever retried automatically; mutations and
//! uploads are not safe to repeat. Authentication failures are handled by the
//! refresh coordinator, never by this policy.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Retry behavior for transient errors on idempotent requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay unit in milliseconds. Attempt `n` waits `(n + 1) * unit`.
    #[serde(default = "default_delay_unit_ms")]
    pub delay_unit_ms: u64,
    /// Hard cap on the computed delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// When true, adds random jitter of up to half the delay unit.
    #[serde(default = "default_true")]
    pub use_jitter: bool,
}

fn default_max_retries() -> u32 {
    2
}

fn default_delay_unit_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_unit_ms: default_delay_unit_ms(),
            max_delay_ms: default_max_delay_ms(),
            use_jitter: default_true(),
        }
    }
}

/// Outcome of a retry check for one attempt. Ephemeral, recomputed per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn no() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    ///
    /// The curve is linear in the attempt index, capped at `max_delay_ms`.
    /// Jitter stays below the spacing between attempts, so delays remain
    /// non-decreasing even with jitter on.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self
            .delay_unit_ms
            .saturating_mul(u64::from(attempt) + 1)
            .min(self.max_delay_ms);

        if !self.use_jitter {
            return Duration::from_millis(base_ms);
        }

        let jitter_range_ms = self.delay_unit_ms / 2;
        if jitter_range_ms == 0 {
            return Duration::from_millis(base_ms);
        }

        use rand::RngExt;
        let jitter_ms = rand::rng().random_range(0..jitter_range_ms);
        Duration::from_millis((base_ms + jitter_ms).min(self.max_delay_ms))
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// `attempt` is the number of retries already spent (0 on the first
    /// failure). Only GET and HEAD requests qualify; everything else could
    /// duplicate a side effect.
    pub fn decision(&self, method: &Method, error: &ApiError, attempt: u32) -> RetryDecision {
        let idempotent = *method == Method::GET || *method == Method::HEAD;
        if !idempotent || !error.is_retryable() || attempt >= self.max_retries {
            return RetryDecision::no();
        }

        RetryDecision {
            should_retry: true,
            delay: self.delay_for_attempt(attempt),
        }
    }
}
