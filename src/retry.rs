//! Bounded exponential backoff for idempotent provider reads.
//!
//! Only GET calls go through here. Uploads and project creation spend money
//! on the provider side and are sent exactly once.

use crate::error::{GatewayError, GatewayResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first one, at least 1
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Three attempts, waiting 500ms then 1s
    pub fn provider_read() -> Self {
        Self::new(3, Duration::from_millis(500)).with_max_delay(Duration::from_secs(4))
    }

    /// One attempt, no waiting
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Waits between attempts: `max_attempts - 1` entries, each capped at
    /// `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(move |retry| {
            let millis =
                self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
            Duration::from_millis(millis as u64).min(self.max_delay)
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::provider_read()
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// refuses, or runs out of attempts. The last error is returned.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delays = config.delays();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{}: succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!("{}: not retrying: {}", operation_name, err);
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            warn!(
                "{}: giving up after {} attempts: {}",
                operation_name, attempt, err
            );
            return Err(err);
        };

        warn!(
            "{}: attempt {}/{} failed ({}), retrying in {:?}",
            operation_name, attempt, config.max_attempts, err, delay
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Retry a provider read on transient transport failures.
pub async fn retry_read<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    with_retry_if(config, operation_name, operation, GatewayError::is_retryable).await
}
