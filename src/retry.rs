//! Retry policy with exponential backoff for failed downloads.
//!
//! When a download fails, its persisted attempt count is incremented and the
//! [`RetryPolicy`] decides what happens next: wait and leave the URL queued,
//! or give up and demote it to the failure file.
//!
//! # Delay Calculation
//!
//! ```text
//! delay = min(base_delay * multiplier^(attempts - 1), max_delay) + jitter
//! ```
//!
//! With defaults, delays are approximately: 1s, 2s, 4s before the limit.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::DEFAULT_MAX_RETRIES;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Decision after a failed download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the URL in the queue and wait before the next attempt.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Failed attempts recorded so far.
        attempts: u32,
    },

    /// The retry limit is exhausted; demote the URL to the failure file.
    GiveUp {
        /// Failed attempts recorded so far.
        attempts: u32,
    },
}

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries allowed after the initial attempt
    /// * `base_delay` - Base delay for the first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom retry limit, using defaults for the
    /// backoff settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns the configured retry limit.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether a URL with `attempts` recorded failures stays queued.
    ///
    /// `attempts` is the persisted count including the failure that just
    /// happened; a URL is given up once it exceeds the retry limit, so
    /// `max_retries = 3` allows four total attempts.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> RetryDecision {
        if attempts > self.max_retries {
            debug!(attempts, max_retries = self.max_retries, "retries exhausted");
            return RetryDecision::GiveUp { attempts };
        }

        let backoff = self.backoff_delay(attempts);
        let delay = backoff + jitter(backoff.min(MAX_JITTER));
        debug!(attempts, ?delay, "will retry after backoff");
        RetryDecision::Retry { delay, attempts }
    }

    /// Deterministic backoff component (jitter excluded).
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(30).min(30);
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay = self.base_delay.mul_f32(multiplier.max(0.0));
        delay.min(self.max_delay)
    }
}

/// Random jitter so simultaneous consumers don't retry in lockstep.
///
/// Scales down with the backoff itself: a zero-delay policy stays zero.
fn jitter(cap: Duration) -> Duration {
    if cap.is_zero() {
        return Duration::ZERO;
    }
    let cap_millis = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
    let millis = rand::thread_rng().gen_range(0..=cap_millis);
    Duration::from_millis(millis)
}
