//! Retry utilities with exponential backoff.
//!
//! CRM calls made by event handlers go through [`with_retry_if`] so that
//! transient provider failures (timeouts, rate limits) are retried while
//! rejected requests fail the handler immediately.
//!
//! # Example
//!
//! ```rust,no_run
//! use footprint_sync::retry::{with_retry_if, RetryConfig};
//!
//! #[derive(Debug)]
//! enum CallError {
//!     Transient,
//!     Permanent,
//! }
//!
//! async fn example() -> Result<(), CallError> {
//!     with_retry_if(
//!         &RetryConfig::default(),
//!         || async { Err(CallError::Transient) },
//!         |err| matches!(err, CallError::Transient),
//!     )
//!     .await
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Initial delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Base for exponential backoff (typically 2.0)
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            exponential_base: 1.0,
        }
    }

    /// Delay to wait after `delay`, capped at `max_delay`.
    ///
    /// A base that yields a negative or non-finite delay falls back to
    /// `max_delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        let next = (delay.as_secs_f64() * self.exponential_base).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(next).unwrap_or(self.max_delay)
    }
}

/// Execute a function with retries, retrying only errors accepted by
/// `is_retryable`.
///
/// # Returns
///
/// The result of the function call, or the error if it's not retryable
/// or all attempts fail
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut f: F,
    mut is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "CRM call succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::debug!(error = ?e, "Error is not retryable, returning immediately");
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                tracing::error!(
                    attempts = attempt,
                    error = ?e,
                    "All retry attempts exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Attempt failed, retrying"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
