//! Circuit breakers for external dependency protection
//!
//! Each breaker tracks the failure/success history of one named dependency
//! (website fetch, LLM provider, search API) and decides per call whether to
//! allow, block, or probe it. All state for a breaker lives behind a single
//! per-instance mutex so transitions happen in one critical section; breakers
//! for unrelated dependencies never contend.

mod registry;

pub use registry::CircuitBreakerRegistry;

use std::future::Future;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Dependency is failing, calls are rejected
    Open,
    /// Testing whether the dependency has recovered
    HalfOpen,
}

/// Mutable breaker state, guarded by one mutex per instance
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    /// While state is `Open` and now < `opened_until`, calls are rejected
    opened_until: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_until: None,
        }
    }
}

/// Circuit breaker for one named external dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config: config.clone(),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` under breaker protection.
    ///
    /// If the breaker is currently rejecting calls, returns
    /// [`Error::CircuitOpen`] without invoking `f`. Otherwise the outcome of
    /// `f` is recorded against the breaker's state machine and returned
    /// unchanged.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Check whether a call may proceed, transitioning open breakers to
    /// half-open once their recovery timeout has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while the breaker is rejecting calls.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                let expired = inner.opened_until.is_none_or(|until| now >= until);
                if expired {
                    // Recovery timeout elapsed: permit this one call as a probe
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    debug!(breaker = %self.name, "circuit open, rejecting call");
                    Err(Error::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                debug!(
                    breaker = %self.name,
                    successes = inner.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "success in half-open state"
                );
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                warn!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "failure in closed state"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during the probe window re-opens the circuit
                warn!(breaker = %self.name, "failure in half-open state, reopening");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Read-only status snapshot; never mutates breaker state, so an open
    /// breaker whose recovery timeout has elapsed still reports `open` here.
    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let now = Instant::now();

        let retry_in_ms = match inner.state {
            CircuitState::Open => inner
                .opened_until
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
            _ => None,
        };

        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            is_healthy: inner.state == CircuitState::Closed,
            retry_in_ms,
            last_failure_age_ms: inner
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            last_success_age_ms: inner
                .last_success_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }

    /// Administrative override: return to a fresh closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new();
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Administrative override: open the circuit for a full recovery timeout
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.opened_until = Some(Instant::now() + self.config.recovery_timeout);
        warn!(breaker = %self.name, "circuit breaker manually opened");
    }

    /// Transition to a new state, resetting counters. Caller holds the lock.
    fn transition(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.opened_until = None;
                info!(breaker = %self.name, ?old_state, "circuit breaker closed");
            }
            CircuitState::Open => {
                inner.opened_until = Some(Instant::now() + self.config.recovery_timeout);
                warn!(
                    breaker = %self.name,
                    ?old_state,
                    failures = inner.consecutive_failures,
                    recovery = ?self.config.recovery_timeout,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
                debug!(breaker = %self.name, "circuit breaker half-open, probing");
            }
        }
    }
}

/// Read-only breaker snapshot for health dashboards
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures since the last transition
    pub consecutive_failures: u32,
    /// Consecutive successes since the last transition
    pub consecutive_successes: u32,
    /// Whether the breaker is closed
    pub is_healthy: bool,
    /// Remaining rejection window while open (milliseconds)
    pub retry_in_ms: Option<u64>,
    /// Time since the last recorded failure (milliseconds)
    pub last_failure_age_ms: Option<u64>,
    /// Time since the last recorded success (milliseconds)
    pub last_success_age_ms: Option<u64>,
}
