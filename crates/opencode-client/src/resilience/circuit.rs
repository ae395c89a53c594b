//! Circuit breaker.
//!
//! One breaker is shared by every call made through a client (and may be
//! shared across clients by injecting the same `Arc`). All transitions happen
//! under a single mutex, so concurrent calls cannot lose a failure count or
//! open the circuit twice.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::CallContext;
use crate::error::{Error, ErrorKind, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast until the open duration elapses.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit (>= 1).
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive transient failures recorded while closed.
    pub consecutive_failures: u32,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// When the state last changed.
    pub changed_at: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    changed_at: Instant,
    /// Id of the half-open probe currently in flight.
    probe: Option<u64>,
    next_probe: u64,
}

impl BreakerState {
    fn transition(&mut self, state: CircuitState, now: Instant) {
        self.state = state;
        self.changed_at = now;
    }

    fn claim_probe(&mut self) -> u64 {
        self.next_probe += 1;
        self.probe = Some(self.next_probe);
        self.next_probe
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

/// Admission to make one call through a [`CircuitBreaker`].
///
/// Only the permit that was admitted as the half-open probe can resolve the
/// probe. An unsettled permit records an ignored outcome when dropped, so a
/// cancelled or abandoned call never leaves the probe slot taken.
#[derive(Debug)]
#[must_use = "an unsettled permit records an ignored outcome"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// The server handled the call. Resets the failure count; a probe closes
    /// the circuit.
    pub fn record_success(self) {
        self.settle(Outcome::Success);
    }

    /// The call failed transiently. Counts toward the threshold; a probe
    /// reopens the circuit.
    pub fn record_failure(self) {
        self.settle(Outcome::Failure);
    }

    /// The outcome says nothing about server health (e.g. cancelled). A probe
    /// frees its slot without changing state.
    pub fn record_ignored(self) {
        self.settle(Outcome::Ignored);
    }

    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.probe, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.probe, Outcome::Ignored);
        }
    }
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// A zero threshold is treated as 1.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            ..config
        };
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                changed_at: Instant::now(),
                probe: None,
                next_probe: 0,
            }),
        }
    }

    /// The breaker's thresholds.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Snapshot of state, failure count and timestamps.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let s = self.state.lock();
        CircuitSnapshot {
            state: s.state,
            consecutive_failures: s.failures,
            opened_at: s.opened_at,
            changed_at: s.changed_at,
        }
    }

    /// Whether calls are currently being rejected.
    ///
    /// An open circuit whose cool-down has elapsed is not reported as open,
    /// since the next call will be admitted as a probe.
    pub fn is_open(&self) -> bool {
        self.open_for().is_some()
    }

    /// Remaining cool-down if calls are currently being rejected.
    ///
    /// Unlike [`Self::try_acquire`] this never changes state.
    pub fn open_for(&self) -> Option<Duration> {
        let s = self.state.lock();
        if s.state != CircuitState::Open {
            return None;
        }
        let remaining = self.remaining(&s, Instant::now());
        (remaining > Duration::ZERO).then_some(remaining)
    }

    /// Ask to make a call.
    ///
    /// Returns `Err(retry_in)` when the call must be rejected. An open circuit
    /// whose cool-down has elapsed moves to half-open and admits exactly one
    /// probe; further callers are rejected until the probe resolves.
    ///
    /// The returned [`Permit`] must be settled with one of its `record_*`
    /// methods. Dropping it unsettled counts as [`Permit::record_ignored`].
    pub fn try_acquire(&self) -> std::result::Result<Permit<'_>, Duration> {
        let now = Instant::now();
        let mut s = self.state.lock();
        let probe = match s.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let remaining = self.remaining(&s, now);
                if remaining > Duration::ZERO {
                    return Err(remaining);
                }
                tracing::info!("Circuit breaker half-open, admitting probe");
                s.transition(CircuitState::HalfOpen, now);
                Some(s.claim_probe())
            }
            CircuitState::HalfOpen => {
                if s.probe.is_some() {
                    return Err(Duration::ZERO);
                }
                Some(s.claim_probe())
            }
        };
        Ok(Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut s = self.state.lock();
        s.transition(CircuitState::Closed, now);
        s.failures = 0;
        s.opened_at = None;
        s.probe = None;
    }

    /// Run `next` under the breaker.
    ///
    /// Rejected calls fail with [`Error::CircuitOpen`] before `next` is polled.
    /// If the returned future is dropped mid-call the outcome is ignored.
    pub async fn call<T, F, Fut>(&self, ctx: &CallContext, mut next: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(retry_in) => {
                tracing::debug!(operation = %ctx.operation, "Circuit open, failing fast");
                return Err(Error::CircuitOpen {
                    operation: ctx.operation.clone(),
                    retry_in,
                });
            }
        };

        let result = next().await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(e) if e.is_transient() => permit.record_failure(),
            // The server answered; the request itself was wrong.
            Err(e) if e.kind() == ErrorKind::ClientRequest => permit.record_success(),
            Err(_) => permit.record_ignored(),
        }
        result
    }

    fn settle(&self, probe: Option<u64>, outcome: Outcome) {
        let now = Instant::now();
        let mut s = self.state.lock();
        let is_probe = probe.is_some() && s.probe == probe;
        if is_probe {
            s.probe = None;
        }

        match (outcome, s.state) {
            (Outcome::Success, CircuitState::Closed) => s.failures = 0,
            (Outcome::Success, CircuitState::HalfOpen) if is_probe => {
                tracing::info!("Circuit breaker closed");
                s.transition(CircuitState::Closed, now);
                s.failures = 0;
                s.opened_at = None;
            }
            (Outcome::Failure, CircuitState::Closed) => {
                s.failures += 1;
                if s.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = s.failures,
                        open_ms = self.config.open_duration.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    s.transition(CircuitState::Open, now);
                    s.opened_at = Some(now);
                }
            }
            (Outcome::Failure, CircuitState::HalfOpen) if is_probe => {
                tracing::warn!("Circuit breaker probe failed, reopening");
                s.transition(CircuitState::Open, now);
                s.opened_at = Some(now);
            }
            // Late outcomes of calls admitted before the circuit opened, and
            // ignored outcomes, leave the state alone.
            _ => {}
        }
    }

    fn remaining(&self, s: &BreakerState, now: Instant) -> Duration {
        match s.opened_at {
            Some(opened) => self
                .config
                .open_duration
                .saturating_sub(now.saturating_duration_since(opened)),
            None => Duration::ZERO,
        }
    }
}
