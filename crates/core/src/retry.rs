//! Job retry budget and provider backoff policy.
//!
//! Two separate retry layers exist:
//!
//! - The **job** layer: a failed job is reset to `pending` in place with
//!   `retries + 1` until [`MAX_RETRIES`] is reached, then it fails terminally.
//! - The **call** layer: a single provider call is retried with jittered
//!   exponential backoff when the failure looks transient (HTTP 429/5xx,
//!   connection resets, timeouts).

use std::time::Duration;

use rand::Rng;

/// Number of in-place retries a job gets after its first attempt.
pub const MAX_RETRIES: u32 = 3;

/// HTTP status codes that mark a provider failure as transient.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Lower-cased message fragments that mark a failure as transient.
const TRANSIENT_MARKERS: [&str; 6] = [
    "econnreset",
    "connection reset",
    "etimedout",
    "timed out",
    "timeout",
    "socket hang up",
];

// ---------------------------------------------------------------------------
// Job-level retry
// ---------------------------------------------------------------------------

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reset the job to pending with the given retry counter.
    RetryInPlace { next_retries: u32 },
    /// Budget spent; fail the job terminally.
    Exhausted,
}

/// Decide whether a job that has already been retried `retries` times gets
/// another attempt.
pub fn decide(retries: u32, max_retries: u32) -> RetryDecision {
    if retries < max_retries {
        RetryDecision::RetryInPlace {
            next_retries: retries + 1,
        }
    } else {
        RetryDecision::Exhausted
    }
}

// ---------------------------------------------------------------------------
// Call-level backoff
// ---------------------------------------------------------------------------

/// Tunable parameters for jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Deterministic delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(ms).min(self.max_delay)
    }

    /// Delay before retry number `attempt` with random jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base.as_millis() as f64 * self.jitter.clamp(0.0, 1.0);
        if spread < 1.0 {
            return base;
        }
        let offset = rand::rng().random_range(-spread..=spread);
        let ms = (base.as_millis() as f64 + offset).max(0.0) as u64;
        Duration::from_millis(ms).min(self.max_delay)
    }
}

/// Whether an HTTP-like status code is worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Whether an error message describes a transient network condition.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
