//! Tests for the health gauge registry

use super::*;

// ============================================================================
// Direct inc/dec tests
// ============================================================================

#[test]
fn test_untouched_gauge_reads_zero() {
    let health = HealthRegistrar::new();
    assert_eq!(health.get("subscriptionCount"), 0);
}

#[test]
fn test_inc_dec() {
    let health = HealthRegistrar::new();

    health.inc("subscriptionCount");
    health.inc("subscriptionCount");
    assert_eq!(health.get("subscriptionCount"), 2);

    health.dec("subscriptionCount");
    assert_eq!(health.get("subscriptionCount"), 1);
}

#[test]
fn test_gauges_are_independent() {
    let health = HealthRegistrar::new();

    health.inc("subscriptionCount");
    health.inc("workerCount");
    health.inc("workerCount");

    assert_eq!(health.get("subscriptionCount"), 1);
    assert_eq!(health.get("workerCount"), 2);
}

// ============================================================================
// Tracked guard tests
// ============================================================================

#[test]
fn test_track_increments_and_drop_decrements() {
    let health = HealthRegistrar::new();

    {
        let _guard = health.track("subscriptionCount");
        assert_eq!(health.get("subscriptionCount"), 1);

        let _second = health.track("subscriptionCount");
        assert_eq!(health.get("subscriptionCount"), 2);
    }

    assert_eq!(health.get("subscriptionCount"), 0);
}

#[test]
fn test_track_releases_on_unwind() {
    let health = HealthRegistrar::new();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = health.track("subscriptionCount");
        panic!("boom");
    }));

    assert!(result.is_err());
    assert_eq!(health.get("subscriptionCount"), 0);
}

#[test]
fn test_snapshot() {
    let health = HealthRegistrar::new();
    health.inc("a");
    health.inc("b");
    health.dec("b");

    let snapshot = health.snapshot();
    assert_eq!(snapshot.get("a"), Some(&1));
    assert_eq!(snapshot.get("b"), Some(&0));
}

#[test]
fn test_concurrent_track() {
    use std::sync::Arc;
    use std::thread;

    let health = Arc::new(HealthRegistrar::new());
    let mut handles = vec![];

    for _ in 0..8 {
        let health = Arc::clone(&health);
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                let _guard = health.track("subscriptionCount");
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(health.get("subscriptionCount"), 0);
}
