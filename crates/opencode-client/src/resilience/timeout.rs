//! Per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use super::CallContext;
use crate::error::{Error, Result};

/// Bounds a single attempt with a deadline.
///
/// For streaming calls the attempt ends once the response headers arrive, so
/// the deadline covers connection establishment only and never the lifetime
/// of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Deadline used when the call does not carry its own.
    pub timeout: Duration,
}

impl TimeoutPolicy {
    /// Create a policy with the given default deadline.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Deadline that applies to `ctx`.
    pub fn deadline_for(&self, ctx: &CallContext) -> Duration {
        ctx.deadline.unwrap_or(self.timeout)
    }

    /// Run one attempt under the deadline.
    ///
    /// On expiry the in-flight attempt is dropped (which aborts its request)
    /// and [`Error::Timeout`] is returned.
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext, mut next: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.deadline_for(ctx);
        match tokio::time::timeout(deadline, next()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    operation = %ctx.operation,
                    timeout_ms = deadline.as_millis() as u64,
                    "Attempt timed out"
                );
                Err(Error::Timeout {
                    operation: ctx.operation.clone(),
                    after: deadline,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1));
        let ctx = CallContext::new("GET /slow");

        let err = policy
            .call(&ctx, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.is_transient());
        assert!(err.to_string().contains("1000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1));
        let ctx = CallContext::new("GET /fast");
        let value = policy
            .call(&ctx, || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline_overrides_default() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1));
        let ctx = CallContext::new("POST /session/s/message").with_deadline(Duration::from_secs(300));
        assert_eq!(policy.deadline_for(&ctx), Duration::from_secs(300));

        let value = policy
            .call(&ctx, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("generated")
            })
            .await
            .unwrap();
        assert_eq!(value, "generated");
    }
}
