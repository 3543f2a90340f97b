//! Retry with exponential backoff for provider calls
//!
//! Runs an async operation up to `max_attempts` times, sleeping between
//! attempts with capped exponential backoff plus jitter. Typed
//! [`IntegrationError`](crate::IntegrationError)s that are not retryable are
//! returned immediately.

use crate::error::FailureSignal;
use crate::metrics;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay, jitter included
    pub max_delay: Duration,

    /// Backoff multiplier
    pub factor: f64,

    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config for rate-limited APIs (longer initial backoff)
    pub fn for_rate_limited() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            factor: 2.0,
            jitter: true,
        }
    }

    /// Create a config for quick retries (short backoff)
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Single attempt, never retry
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// A `factor` below 1.0 (or NaN) backs off as 1.0. The result always lies
    /// in `0..=max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.factor.max(1.0);
        let max = self.max_delay.as_secs_f64();
        let base = (self.base_delay.as_secs_f64() * factor.powi(exponent)).min(max);

        let delay = if self.jitter {
            base + base * 0.1 * rand::random::<f64>()
        } else {
            base
        };

        if !delay.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(delay.clamp(0.0, max)).unwrap_or(self.max_delay)
    }
}

/// Executes operations under a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry logic
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging and metrics
    /// * `operation` - The async operation to execute
    ///
    /// # Returns
    /// The first successful result, or the last error
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureSignal + Display,
    {
        self.execute_with_checkpoint(operation_name, operation, |_| Ok(()))
            .await
    }

    /// Like [`execute`](Self::execute), but runs `checkpoint` before every attempt
    ///
    /// The checkpoint receives the 1-based attempt number. An error from it
    /// aborts the loop without running the attempt.
    pub async fn execute_with_checkpoint<F, Fut, T, E, C>(
        &self,
        operation_name: &str,
        mut operation: F,
        mut checkpoint: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureSignal + Display,
        C: FnMut(u32) -> Result<(), E>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            checkpoint(attempt)?;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.integration_error().is_some_and(|typed| !typed.is_retryable()) {
                        debug!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation failed with non-retryable error: {}",
                            e
                        );
                        return Err(e);
                    }

                    if attempt >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation failed after {} attempts: {}",
                            attempt,
                            e
                        );
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );
                    metrics::record_retry(operation_name);

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Wrap an operation into a retry-enabled one with the same output
    pub fn wrap<F>(&self, operation_name: impl Into<String>, operation: F) -> Retrying<F> {
        Retrying {
            strategy: self.clone(),
            operation_name: operation_name.into(),
            operation,
        }
    }
}

/// An operation bound to a retry strategy
pub struct Retrying<F> {
    strategy: RetryStrategy,
    operation_name: String,
    operation: F,
}

impl<F, Fut, T, E> Retrying<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureSignal + Display,
{
    /// Run the wrapped operation under the strategy
    pub async fn call(&mut self) -> Result<T, E> {
        self.strategy
            .execute(&self.operation_name, &mut self.operation)
            .await
    }
}
