//! Integration tests for the resilience module
//!
//! Drives the circuit breaker through full open/probe/recover cycles the way
//! the request dispatcher does: admission check, attempt, outcome record.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_common::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, MockClock};

fn breaker_with_clock(threshold: u64, reset: Duration, probes: u64) -> (Arc<CircuitBreaker>, MockClock) {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .reset_timeout(reset)
        .half_open_max_calls(probes)
        .build()
        .expect("valid config");
    let breaker = CircuitBreaker::with_clock(config, clock.clone()).expect("valid breaker");
    (Arc::new(breaker), clock)
}

/// Simulates a guarded call: admission, attempt, record.
fn guarded_call(breaker: &CircuitBreaker, upstream_healthy: bool, attempts: &AtomicU32) -> bool {
    if !breaker.can_execute() {
        return false;
    }
    attempts.fetch_add(1, Ordering::SeqCst);
    if upstream_healthy {
        breaker.record_success();
    } else {
        breaker.record_failure();
    }
    true
}

/// Validates the breaker sheds load while the upstream is down and recovers
/// after the cool-down.
///
/// # Test Steps
/// 1. Fail three guarded calls to open the circuit
/// 2. Confirm further calls never reach the upstream
/// 3. Advance past the reset timeout and let the probe succeed
/// 4. Confirm traffic flows again
#[test]
fn test_outage_and_recovery_cycle() {
    let (breaker, clock) = breaker_with_clock(3, Duration::from_secs(10), 1);
    let attempts = AtomicU32::new(0);

    for _ in 0..3 {
        assert!(guarded_call(&breaker, false, &attempts));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    for _ in 0..20 {
        assert!(!guarded_call(&breaker, false, &attempts));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3, "open circuit must not reach upstream");

    clock.advance(Duration::from_secs(10));
    assert!(guarded_call(&breaker, true, &attempts));
    assert_eq!(breaker.state(), CircuitState::Closed);

    for _ in 0..5 {
        assert!(guarded_call(&breaker, true, &attempts));
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 9);
}

#[test]
fn test_failed_probe_extends_outage() {
    let (breaker, clock) = breaker_with_clock(2, Duration::from_secs(5), 1);
    let attempts = AtomicU32::new(0);

    guarded_call(&breaker, false, &attempts);
    guarded_call(&breaker, false, &attempts);
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(5));
    assert!(guarded_call(&breaker, false, &attempts));
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(4));
    assert!(!guarded_call(&breaker, true, &attempts));

    clock.advance(Duration::from_secs(1));
    assert!(guarded_call(&breaker, true, &attempts));
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates only `half_open_max_calls` concurrent probes are admitted.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_probes_are_bounded() {
    let (breaker, clock) = breaker_with_clock(1, Duration::from_millis(100), 2);
    breaker.record_failure();
    clock.advance(Duration::from_millis(100));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move { breaker.can_execute() }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.expect("task should not panic") {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 2);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.stats().half_open_calls, 2);
}

#[test]
fn test_operator_reset_restores_traffic() {
    let (breaker, _clock) = breaker_with_clock(1, Duration::from_secs(3600), 1);
    breaker.record_failure();
    assert!(!breaker.can_execute());

    breaker.reset();

    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);
    assert_eq!(stats.last_failure_time, None);
    assert!(breaker.can_execute());
}
