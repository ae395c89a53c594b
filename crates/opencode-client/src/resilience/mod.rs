//! Resilience pipeline wrapped around every outbound request.
//!
//! A [`Pipeline`] is an ordered list of [`Layer`]s, outermost first. Each
//! layer receives "the rest of the pipeline" as a closure and decides whether,
//! when and how often to invoke it. The canonical assembly is
//!
//! ```text
//! CircuitBreaker -> Retry -> Timeout -> transport attempt
//! ```
//!
//! so the breaker sees one outcome per logical call, retries re-run the
//! timeout-bounded attempt from scratch, and an open breaker rejects a call
//! before any network activity.

mod circuit;
mod retry;
mod timeout;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use opencode_config::ClientConfig;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Permit,
};
pub use retry::{RetryAttempt, RetryPolicy};
pub use timeout::TimeoutPolicy;

/// Per-call information shared by all layers.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Human-readable operation name, e.g. `GET /session`.
    pub operation: String,
    /// Cancellation signal for the whole call, including backoff waits.
    pub cancel: CancellationToken,
    /// Attempt deadline overriding the timeout layer's default.
    pub deadline: Option<Duration>,
}

impl CallContext {
    /// Create a context with a fresh (never cancelled) token.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Use the given cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a specific attempt deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One stage of the pipeline.
#[derive(Debug, Clone)]
pub enum Layer {
    /// Fail fast while the shared breaker is open.
    CircuitBreaker(Arc<CircuitBreaker>),
    /// Re-run the inner stages after transient failures.
    Retry(RetryPolicy),
    /// Bound each attempt with a deadline.
    Timeout(TimeoutPolicy),
}

impl Layer {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Layer::CircuitBreaker(_) => "circuit_breaker",
            Layer::Retry(_) => "retry",
            Layer::Timeout(_) => "timeout",
        }
    }
}

/// The innermost step: one transport attempt.
pub type Attempt<'f, T> = dyn Fn() -> BoxFuture<'f, Result<T>> + Send + Sync + 'f;

/// Ordered stack of resilience layers.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    layers: Vec<Layer>,
}

impl Pipeline {
    /// Build a pipeline from layers listed outermost first.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// A pipeline with no layers; every call goes straight to the transport.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Assemble the canonical CircuitBreaker -> Retry -> Timeout stack.
    ///
    /// Disabled features are left out. When `breaker` is given it is used as
    /// the shared breaker instead of creating one from `config`.
    pub fn from_config(config: &ClientConfig, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        let mut layers = Vec::with_capacity(3);

        if config.enable_circuit_breaker {
            let breaker = breaker.unwrap_or_else(|| {
                Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                    failure_threshold: config.circuit_breaker_threshold,
                    open_duration: config.circuit_breaker_duration(),
                }))
            });
            layers.push(Layer::CircuitBreaker(breaker));
        }

        if config.enable_retry && config.max_retry_attempts > 0 {
            layers.push(Layer::Retry(RetryPolicy {
                max_attempts: config.max_retry_attempts,
                base_delay: config.retry_base_delay(),
                max_jitter: config.max_retry_jitter(),
            }));
        }

        if config.enable_operation_timeout {
            layers.push(Layer::Timeout(TimeoutPolicy::new(config.operation_timeout())));
        }

        Self { layers }
    }

    /// Layers, outermost first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The shared circuit breaker, if the pipeline has one.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.layers.iter().find_map(|layer| match layer {
            Layer::CircuitBreaker(breaker) => Some(breaker),
            _ => None,
        })
    }

    /// Run `attempt` through every layer.
    ///
    /// `attempt` may be invoked several times (once per retry) and must
    /// rebuild its request from scratch each time.
    pub async fn execute<'a, T, F>(&'a self, ctx: &'a CallContext, attempt: F) -> Result<T>
    where
        T: Send + 'a,
        F: Fn() -> BoxFuture<'a, Result<T>> + Send + Sync + 'a,
    {
        let attempt: &Attempt<'a, T> = &attempt;
        self.run(0, ctx, attempt).await
    }

    fn run<'p, 'f: 'p, T: Send + 'p>(
        &'p self,
        index: usize,
        ctx: &'p CallContext,
        attempt: &'p Attempt<'f, T>,
    ) -> BoxFuture<'p, Result<T>> {
        let Some(layer) = self.layers.get(index) else {
            return attempt();
        };
        let next = move || self.run(index + 1, ctx, attempt);

        match layer {
            Layer::CircuitBreaker(breaker) => breaker.call(ctx, next).boxed(),
            Layer::Retry(policy) => {
                let guard = self.circuit_breaker().map(Arc::as_ref);
                policy.call(ctx, guard, next).boxed()
            }
            Layer::Timeout(policy) => policy.call(ctx, next).boxed(),
        }
    }
}
