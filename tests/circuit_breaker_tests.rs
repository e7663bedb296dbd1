use std::time::Duration;

use notify_service::clients::circuit_breaker::CircuitBreaker;
use notify_service::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

fn breaker(max_failures: u32, recovery_ms: u64) -> CircuitBreaker {
    CircuitBreaker::new(
        "test",
        CircuitBreakerConfig {
            max_failures,
            recovery_timeout: Duration::from_millis(recovery_ms),
            half_open_max_requests: 1,
        },
    )
}

/// Test: Breaker stays closed below the failure threshold
#[test]
fn test_stays_closed_below_threshold() {
    let breaker = breaker(5, 30_000);

    for _ in 0..4 {
        assert!(breaker.allow());
        breaker.record_failure();
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow());
}

/// Test: Breaker opens after max consecutive failures and fails fast
#[test]
fn test_opens_after_consecutive_failures() {
    let breaker = breaker(5, 30_000);

    for _ in 0..5 {
        assert!(breaker.allow());
        breaker.record_failure();
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow(), "open breaker must reject calls");

    let stats = breaker.stats();
    assert_eq!(stats.total_failures, 5);
    assert_eq!(stats.total_rejected, 1);
}

/// Test: A success in closed state resets the consecutive failure counter
#[test]
fn test_success_resets_failure_counter() {
    let breaker = breaker(5, 30_000);

    for _ in 0..4 {
        breaker.record_failure();
    }
    breaker.record_success();

    for _ in 0..4 {
        breaker.record_failure();
    }
    assert_eq!(
        breaker.state(),
        CircuitState::Closed,
        "counter should have been reset by the success"
    );

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Test: One probe is admitted after the recovery timeout
#[test]
fn test_probe_admitted_after_recovery_timeout() {
    let breaker = breaker(1, 50);

    assert!(breaker.allow());
    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow());

    std::thread::sleep(Duration::from_millis(80));

    assert!(breaker.allow(), "probe should pass after recovery timeout");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(
        !breaker.allow(),
        "only one probe may be in flight in half-open"
    );
}

/// Test: Breaker closes on probe success
#[test]
fn test_closes_on_probe_success() {
    let breaker = breaker(1, 50);

    breaker.record_failure();
    std::thread::sleep(Duration::from_millis(80));
    assert!(breaker.allow());

    breaker.record_success();

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.allow());
}

/// Test: Breaker reopens on probe failure
#[test]
fn test_reopens_on_probe_failure() {
    let breaker = breaker(1, 50);

    breaker.record_failure();
    std::thread::sleep(Duration::from_millis(80));
    assert!(breaker.allow());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(
        !breaker.allow(),
        "fresh failure restarts the recovery timeout"
    );
}

/// Test: Stats track totals and transitions
#[test]
fn test_stats_track_totals() {
    let breaker = breaker(2, 30_000);

    assert!(breaker.allow());
    breaker.record_success();
    assert!(breaker.allow());
    breaker.record_failure();
    assert!(breaker.allow());
    breaker.record_failure();
    assert!(!breaker.allow());

    let stats = breaker.stats();
    assert_eq!(stats.name, "test");
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.total_successes, 1);
    assert_eq!(stats.total_failures, 2);
    assert_eq!(stats.total_rejected, 1);
    assert_eq!(stats.consecutive_failures, 2);
    assert!(stats.last_failure_at.is_some());
}
