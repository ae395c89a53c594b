//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::CallContext;
use super::circuit::CircuitBreaker;
use crate::error::{Error, ErrorKind, Result};

/// Retry settings.
///
/// Retry `k` (1-indexed) waits `base_delay * 2^(k-1) + uniform(0, max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
        }
    }
}

/// A single retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Which retry this is (1 = first retry, i.e. the second attempt).
    pub attempt: u32,
    /// How long to wait before making it.
    pub delay: Duration,
    /// Kind of failure that triggered it.
    pub outcome: ErrorKind,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Deterministic part of the delay before retry `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Full delay before retry `attempt`, including jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff(attempt).saturating_add(self.jitter())
    }

    /// Decide whether `error` should be followed by retry number `attempt`.
    pub fn next_attempt(&self, attempt: u32, error: &Error) -> Option<RetryAttempt> {
        if attempt == 0 || attempt > self.max_attempts || !error.is_transient() {
            return None;
        }
        Some(RetryAttempt {
            attempt,
            delay: self.delay_for(attempt),
            outcome: error.kind(),
        })
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_micros().min(u64::MAX as u128) as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..=max))
    }

    /// Run `next`, re-invoking it from scratch after transient failures.
    ///
    /// Stops early when `ctx` is cancelled (also during a backoff wait) or
    /// when `breaker` has been opened by other calls in the meantime.
    pub async fn call<T, F, Fut>(
        &self,
        ctx: &CallContext,
        breaker: Option<&CircuitBreaker>,
        mut next: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            let error = match next().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(retry) = self.next_attempt(retries + 1, &error) else {
                return Err(exhausted(retries, error));
            };

            if let Some(breaker) = breaker
                && let Some(retry_in) = breaker.open_for()
            {
                tracing::debug!(
                    operation = %ctx.operation,
                    "Circuit opened during retries, giving up"
                );
                return Err(Error::CircuitOpen {
                    operation: ctx.operation.clone(),
                    retry_in,
                });
            }

            tracing::warn!(
                operation = %ctx.operation,
                attempt = retry.attempt,
                max_retries = self.max_attempts,
                delay_ms = retry.delay.as_millis() as u64,
                outcome = ?retry.outcome,
                error = %error,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::cancelled(&ctx.operation)),
                _ = tokio::time::sleep(retry.delay) => {}
            }
            retries += 1;
        }
    }
}

fn exhausted(retries: u32, error: Error) -> Error {
    if retries == 0 {
        error
    } else {
        Error::Exhausted {
            attempts: retries + 1,
            source: Box::new(error),
        }
    }
}
