// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker guarding the remote inference backend.
//!
//! Tracks consecutive failures of the wrapped operation and stops calling it
//! for a cooldown period once a threshold is reached. All state lives in a
//! single mutex-guarded struct, so concurrent failures cannot both observe
//! `failure_count == threshold - 1` and skip the transition to open.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Backend unhealthy, requests are rejected without attempting
//! - HalfOpen: Recovery probing, at most `half_open_max_calls` requests pass
//!
//! Policies:
//! - A success while closed resets the failure counter to zero.
//! - A single successful probe closes the circuit.
//! - A failed probe reopens it and restarts the cooldown.
//! - A call that is dropped before completing counts as a failure.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// How long to stay open before probing again
    pub recovery_timeout: Duration,
    /// Maximum number of probe calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            half_open_max_calls: 1,
        }
    }
}

/// Point-in-time view of the breaker, for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_probes_used: u32,
    /// Milliseconds since the most recent recorded failure
    pub last_failure_age_ms: Option<u64>,
    pub calls_total: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_probes_used: u32,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

/// Admission ticket for one guarded call.
///
/// Dropping a ticket without settling it records a failure, so a cancelled
/// probe can never hold the half-open slot forever.
#[must_use]
pub struct CallTicket<'a> {
    breaker: &'a CircuitBreaker,
    admitted_under: CircuitState,
    probe: bool,
    settled: bool,
}

impl CallTicket<'_> {
    /// Whether this call is a half-open recovery probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// State the circuit was in when this call was admitted
    pub fn admitted_under(&self) -> CircuitState {
        self.admitted_under
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CallTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(circuit = %self.breaker.name, "Guarded call dropped before completion");
            self.breaker.record_failure(self.probe);
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_probes_used: 0,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state, without evaluating the recovery timeout.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive-failure count
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Decide whether the next call may go through.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here,
    /// before the decision for this call is made. Returns `None` when the
    /// caller must use its fallback.
    pub fn try_acquire(&self) -> Option<CallTicket<'_>> {
        self.try_admit().ok()
    }

    /// Like [`try_acquire`](Self::try_acquire), but a rejection carries the
    /// state that caused it.
    pub fn try_admit(&self) -> Result<CallTicket<'_>, CircuitState> {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .last_failure
                .map_or(true, |at| at.elapsed() > self.config.recovery_timeout);
            if cooled_down {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_probes_used = 0;
                self.on_transition(CircuitState::Open, CircuitState::HalfOpen, inner.failure_count);
            }
        }

        let current = inner.state;
        let probe = match current {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if inner.half_open_probes_used < self.config.half_open_max_calls => {
                inner.half_open_probes_used += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                drop(inner);
                self.rejections.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "rejected");
                return Err(current);
            }
        };

        Ok(CallTicket {
            breaker: self,
            admitted_under: current,
            probe,
            settled: false,
        })
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, allowing lazy evaluation
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(ticket) = self.try_acquire() else {
            debug!(circuit = %self.name, "Circuit breaker rejected call");
            return Err(CircuitError::Rejected);
        };

        match f().await {
            Ok(value) => {
                ticket.succeed();
                Ok(value)
            }
            Err(e) => {
                ticket.fail();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn record_success(&self, probe: bool) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "success");

        let mut inner = self.inner.lock();
        let current = inner.state;
        match current {
            CircuitState::Closed => inner.failure_count = 0,
            // Only the recovery probes decide the half-open outcome
            CircuitState::HalfOpen if !probe => {}
            CircuitState::HalfOpen => {
                let failures = inner.failure_count;
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_probes_used = 0;
                self.on_transition(CircuitState::HalfOpen, CircuitState::Closed, failures);
            }
            // A call admitted before the circuit tripped; it does not close it.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "failure");

        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && !probe {
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let current = inner.state;
        match current {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                self.on_transition(CircuitState::Closed, CircuitState::Open, inner.failure_count);
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_probes_used = 0;
                self.on_transition(CircuitState::HalfOpen, CircuitState::Open, inner.failure_count);
            }
            _ => {}
        }
    }

    fn on_transition(&self, from: CircuitState, to: CircuitState, failure_count: u32) {
        match to {
            CircuitState::Open => warn!(
                circuit = %self.name,
                %from,
                failure_count,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit opened, serving fallback"
            ),
            _ => info!(circuit = %self.name, %from, %to, failure_count, "Circuit state changed"),
        }
        crate::metrics::set_circuit_state(&self.name, to as u8);
    }

    /// Get a consistent snapshot of state and counters
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_probes_used: inner.half_open_probes_used,
            last_failure_age_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread::sleep;

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..cb.config().failure_threshold {
            cb.try_acquire().expect("closed circuit admits").fail();
        }
    }

    #[tokio::test]
    async fn test_circuit_passes_successful_calls() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        let snap = cb.snapshot();
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_tracks_failures() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        let result: Result<i32, CircuitError<&str>> = cb.call(|| async { Err("boom") }).await;

        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
        assert_eq!(cb.failure_count(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new("test", CircuitConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });

        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.failure_count() >= 3);

        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.rejections(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", CircuitConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });

        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().succeed();
        assert_eq!(cb.failure_count(), 0);

        // Two more failures are not enough after the reset
        cb.try_acquire().unwrap().fail();
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        trip(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // Still cooling down
        assert!(cb.try_acquire().is_none());

        sleep(Duration::from_millis(70));

        // The transition happens on the call itself, before the decision
        let ticket = cb.try_acquire().expect("probe admitted");
        assert!(ticket.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_probes_used, 1);
        ticket.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        trip(&cb);
        sleep(Duration::from_millis(70));

        cb.try_acquire().expect("probe admitted").fail();
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarted from the probe failure
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_probes_bounded_while_half_open() {
        let cb = CircuitBreaker::new("test", CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(20),
            half_open_max_calls: 2,
        });
        cb.try_acquire().unwrap().fail();
        sleep(Duration::from_millis(40));

        let first = cb.try_acquire().expect("first probe");
        let second = cb.try_acquire().expect("second probe");
        assert!(first.is_probe() && second.is_probe());

        // Both probes in flight: further calls fall back without consuming a probe
        assert!(cb.try_acquire().is_none());
        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.snapshot().half_open_probes_used, 2);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        first.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
        // Late probe outcome is applied to the closed circuit
        second.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_dropped_ticket_counts_as_failure() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        trip(&cb);
        sleep(Duration::from_millis(70));

        {
            let _ticket = cb.try_acquire().expect("probe admitted");
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_while_open_does_not_close() {
        let cb = CircuitBreaker::new("test", CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });
        let slow = cb.try_acquire().unwrap();
        cb.try_acquire().unwrap().fail();
        assert_eq!(cb.state(), CircuitState::Open);

        slow.succeed();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_late_outcome_of_closed_call_ignored_while_half_open() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        // Admitted while closed, still in flight when the circuit trips
        let slow_ok = cb.try_acquire().unwrap();
        let slow_err = cb.try_acquire().unwrap();
        assert_eq!(slow_ok.admitted_under(), CircuitState::Closed);
        assert!(!slow_ok.is_probe());
        trip(&cb);
        sleep(Duration::from_millis(70));

        let probe = cb.try_acquire().expect("probe admitted");
        assert_eq!(probe.admitted_under(), CircuitState::HalfOpen);

        slow_ok.succeed();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        slow_err.fail();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_probes_used, 1);

        probe.succeed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_rejection_reports_blocking_state() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        trip(&cb);
        assert!(matches!(cb.try_admit(), Err(CircuitState::Open)));

        sleep(Duration::from_millis(70));
        let _probe = cb.try_admit().expect("probe admitted");
        assert!(matches!(cb.try_admit(), Err(CircuitState::HalfOpen)));
    }

    #[test]
    fn test_concurrent_failures_trip_exactly_once() {
        let cb = Arc::new(CircuitBreaker::new("test", CircuitConfig {
            failure_threshold: 8,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || {
                    if let Some(ticket) = cb.try_acquire() {
                        ticket.fail();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 8);
        assert_eq!(snap.failures, 8);
    }

    #[tokio::test]
    async fn test_rejected_call_never_runs_operation() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        trip(&cb);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result: Result<usize, CircuitError<&str>> = cb
            .call(|| async move { Ok(counter_clone.fetch_add(1, Ordering::SeqCst)) })
            .await;

        assert!(matches!(result, Err(CircuitError::Rejected)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Open.to_string(), "open");
    }
}
