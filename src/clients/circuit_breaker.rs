use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};

/// Three-state gate in front of one downstream provider.
///
/// closed -> open       after `max_failures` consecutive failures
/// open -> half_open    once `recovery_timeout` has elapsed since the last
///                      failure; at most `half_open_max_requests` probes pass
/// half_open -> closed  on probe success
/// half_open -> open    on probe failure
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_requests: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejected: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();

        info!(
            breaker = %name,
            max_failures = config.max_failures,
            recovery_timeout_secs = config.recovery_timeout.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_requests: 0,
                last_failure: None,
                last_failure_at: None,
                last_transition_at: Utc::now(),
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejected: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may proceed right now.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed => true,

            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);

                if recovered {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_requests = 1;
                    info!(breaker = %self.name, "Circuit breaker admitting probe request");
                    true
                } else {
                    inner.total_rejected += 1;
                    false
                }
            }

            CircuitState::HalfOpen => {
                if inner.half_open_requests < self.config.half_open_max_requests {
                    inner.half_open_requests += 1;
                    true
                } else {
                    inner.total_rejected += 1;
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
            info!(breaker = %self.name, "Circuit breaker closed after successful probe");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.max_failures {
                    self.transition(&mut inner, CircuitState::Open);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.max_failures,
                        "Circuit breaker opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                warn!(breaker = %self.name, "Circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejected: inner.total_rejected,
            last_failure_at: inner.last_failure_at,
            last_transition_at: inner.last_transition_at,
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }

        debug!(
            breaker = %self.name,
            from = inner.state.as_str(),
            to = to.as_str(),
            "Circuit breaker state transition"
        );

        inner.state = to;
        inner.last_transition_at = Utc::now();
        inner.half_open_requests = 0;
    }
}
