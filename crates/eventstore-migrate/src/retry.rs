//! Exponential backoff for legacy store reads.
//!
//! Only reads are retried. Counting and paging through a commit collection
//! are idempotent, destination commits are not: a commit that timed out may
//! still have been applied, and replaying it would move the aggregate past the
//! version the tracker expects.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff policy for legacy reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default policy with a different retry budget.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Never retry.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Delay to wait before `attempt` (the first attempt is 0 and never waits).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.add_jitter {
            capped + capped * 0.25 * jitter()
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Random value in `[0, 1)`.
fn jitter() -> f64 {
    const MANTISSA: u64 = 1 << 53;
    // The low half of a v4 uuid is random apart from its two top variant bits
    let (_, low) = uuid::Uuid::new_v4().as_u64_pair();
    (low % MANTISSA) as f64 / MANTISSA as f64
}

/// Whether a failed legacy read is worth repeating.
///
/// Rate limits, IO errors, transport timeouts and 5xx answers are transient.
/// Decoding problems, bad credentials and anything coming from the
/// destination are not.
#[must_use]
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RateLimit(_) | Error::Io(_) => true,
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::SourceConnection(message) => is_transient_message(message),
        _ => false,
    }
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();

    let rate_limited = message.contains("429")
        || message.contains("rate limit")
        || message.contains("too many requests");

    let network = message.contains("timeout")
        || message.contains("timed out")
        || message.contains("connection refused")
        || message.contains("connection reset")
        || message.contains("temporar");

    let server = ["500", "502", "503", "504"]
        .iter()
        .any(|code| message.contains(code))
        || message.contains("internal server error")
        || message.contains("bad gateway")
        || message.contains("service unavailable");

    rate_limited || network || server
}

/// Runs a legacy read, retrying transient failures according to `config`.
///
/// The last error is returned once the retry budget is spent.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut read: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match read().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempt, "Read succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries && is_retryable_error(&e) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_retries = config.max_retries,
                    ?delay,
                    "Transient read failure: {}",
                    e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
