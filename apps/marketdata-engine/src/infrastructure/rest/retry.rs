//! Retry policy with exponential backoff for the batch metrics API.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | HTTP 429 (Rate Limited) | HTTP 400 (Bad Request) |
//! | HTTP 502/503/504 (Gateway) | HTTP 401/403 (Auth Errors) |
//! | Network timeouts | HTTP 404 (No Data) |
//! | Connection reset | Malformed response body |

use std::time::Duration;

use rand::Rng;

/// HTTP status codes worth retrying.
const RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 502, 503, 504];

/// Whether an HTTP status indicates a transient failure.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Retry policy configuration for batch API calls.
#[derive(Debug, Clone)]
pub struct RestRetryPolicy {
    /// Maximum number of attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 250ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 10s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RestRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RestRetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` once the retry budget is exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        // The first attempt is not a retry; one backoff fewer than attempts.
        if self.current_attempt + 1 >= self.max_attempts {
            return None;
        }

        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let base_ms = ((self.initial_backoff_ms as f64 * multiplier) as u64).min(self.max_backoff_ms);
        let jittered_ms = self.apply_jitter(base_ms).min(self.max_backoff_ms);

        self.current_attempt += 1;

        Some(Duration::from_millis(jittered_ms))
    }

    /// Random value in [backoff * (1 - jitter), backoff * (1 + jitter)].
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;

        rng.random_range(min..=max) as u64
    }

    /// Attempts performed so far (0 before the first retry).
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}
