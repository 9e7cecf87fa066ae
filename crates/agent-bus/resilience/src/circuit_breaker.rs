//! Circuit breaker guarding one external dependency.
//!
//! Prevents cascading failures by tracking consecutive failures and
//! temporarily rejecting calls to a dependency that keeps failing.
//! The subsystem calling the dependency is the only writer; health
//! aggregation reads state through [`CircuitBreaker::state`] and
//! [`CircuitBreaker::stats`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,

    /// Calls are rejected.
    Open,

    /// A limited number of probe calls decide whether to close again.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by metrics: closed=0, half-open=1, open=2.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker for a named dependency.
///
/// Tracks failures and successes, transitioning between states:
/// - Closed: normal operation, calls allowed
/// - Open: too many failures, calls rejected
/// - Half-Open: testing whether the dependency recovered, limited calls allowed
pub struct CircuitBreaker {
    /// Dependency this breaker guards.
    name: String,

    /// Current state.
    state: RwLock<CircuitState>,

    /// Configuration.
    config: CircuitBreakerConfig,

    /// Consecutive failures while closed.
    failure_count: AtomicU32,

    /// Consecutive successes while half-open.
    success_count: AtomicU32,

    /// Probe calls admitted while half-open.
    half_open_requests: AtomicU32,

    /// When the circuit last opened.
    opened_at: Mutex<Option<Instant>>,

    /// Time of last state change.
    last_transition: RwLock<DateTime<Utc>>,

    /// Set while an external controller pins the breaker open; timeouts and
    /// successes do not move a held breaker.
    held_open: AtomicBool,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker for a dependency.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CircuitState::Closed),
            config,
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_requests: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            last_transition: RwLock::new(Utc::now()),
            held_open: AtomicBool::new(false),
        }
    }

    /// Get the dependency name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state, applying the open -> half-open timeout first.
    pub fn state(&self) -> CircuitState {
        self.check_timeout();
        *self.state.read()
    }

    /// Check if a request should be allowed.
    ///
    /// A half-open slot taken here is only given back when the circuit
    /// changes state. Calls that may be cancelled should go through
    /// [`try_acquire`](Self::try_acquire) instead.
    pub fn allow_request(&self) -> bool {
        self.admit().is_some()
    }

    /// Admit one call, returning a permit that records its outcome.
    ///
    /// Dropping the permit without recording an outcome returns the
    /// half-open slot it holds, if any.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.admit().map(|probe| CallPermit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut state = self.state.write();

        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    info!(
                        breaker = %self.name,
                        successes,
                        "Circuit breaker closing after successful probes"
                    );
                    self.transition_to(&mut state, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut state = self.state.write();

        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures,
                        "Circuit breaker opening due to failures"
                    );
                    self.transition_to(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker re-opening after half-open failure");
                self.transition_to(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut state = self.state.write();
        info!(
            breaker = %self.name,
            old_state = %*state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        self.transition_to(&mut state, new_state);
    }

    /// Reset the circuit breaker to closed state. Ignored while held open.
    pub fn reset(&self) {
        if self.is_held_open() {
            debug!(breaker = %self.name, "Reset ignored while breaker is held open");
            return;
        }
        self.force_state(CircuitState::Closed);
    }

    /// Pin the breaker open until [`release_hold`](Self::release_hold).
    pub fn hold_open(&self) {
        self.held_open.store(true, Ordering::SeqCst);
        self.force_state(CircuitState::Open);
    }

    /// Release a hold and put the breaker back into `restore`.
    pub fn release_hold(&self, restore: CircuitState) {
        self.held_open.store(false, Ordering::SeqCst);
        self.force_state(restore);
    }

    /// Whether an external controller currently pins the breaker open.
    pub fn is_held_open(&self) -> bool {
        self.held_open.load(Ordering::SeqCst)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            last_transition: *self.last_transition.read(),
        }
    }

    /// Admission decision. `Some(true)` marks a half-open probe slot.
    fn admit(&self) -> Option<bool> {
        self.check_timeout();

        let state = self.state.read();
        match *state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                let max = self.config.half_open_max_requests;
                self.half_open_requests
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
                    .ok()
                    .map(|_| true)
            }
        }
    }

    /// Give back a half-open slot whose call ended without an outcome.
    fn release_probe(&self) {
        let state = self.state.read();
        if *state != CircuitState::HalfOpen {
            return;
        }
        let released = self
            .half_open_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if released {
            debug!(breaker = %self.name, "Half-open slot released by abandoned call");
        }
    }

    /// Check if reset timeout has passed and transition from open to half-open.
    fn check_timeout(&self) {
        if *self.state.read() != CircuitState::Open || self.is_held_open() {
            return;
        }

        let elapsed = match *self.opened_at.lock() {
            Some(opened_at) => opened_at.elapsed(),
            None => return,
        };

        if elapsed >= self.config.reset_timeout() {
            let mut state = self.state.write();
            if *state == CircuitState::Open && !self.is_held_open() {
                info!(breaker = %self.name, "Circuit breaker half-open after reset timeout");
                self.transition_to(&mut state, CircuitState::HalfOpen);
            }
        }
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(&self, state: &mut CircuitState, new_state: CircuitState) {
        *state = new_state;
        *self.last_transition.write() = Utc::now();

        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                *self.opened_at.lock() = None;
            }
            CircuitState::Open => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_requests.store(0, Ordering::SeqCst);
                *self.opened_at.lock() = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_requests.store(0, Ordering::SeqCst);
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &*self.state.read())
            .finish()
    }
}

/// An admitted call through a [`CircuitBreaker`].
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure).
/// An unsettled permit hands its half-open slot back when dropped, so a
/// cancelled call does not leave the breaker short of probes.
#[must_use = "a permit should be settled with the call outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Record the call as successful.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Record the call as failed.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Dependency name.
    pub name: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures (closed state).
    pub failure_count: u32,

    /// Consecutive successes (half-open state).
    pub success_count: u32,

    /// Time of last state transition.
    pub last_transition: DateTime<Utc>,
}
