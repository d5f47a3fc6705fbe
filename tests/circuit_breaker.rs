use workstream::breaker::{
    fingerprint, AttemptRecord, BreakerConfig, CircuitBreaker, ErrorSignature, TripReason,
};
use workstream::breaker::signature::MAX_SIGNATURE_LEN;

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(&BreakerConfig {
        max_attempts: 3,
        max_error_repeats: 2,
        oscillation_threshold: 2,
    })
}

fn failed(attempt: u32, sig: &str) -> AttemptRecord {
    AttemptRecord {
        attempt,
        error_signature: Some(sig.to_string()),
        content_hash: None,
    }
}

fn produced(attempt: u32, hash: &str) -> AttemptRecord {
    AttemptRecord {
        attempt,
        error_signature: None,
        content_hash: Some(hash.to_string()),
    }
}

#[test]
fn attempt_at_the_limit_is_allowed_and_one_past_trips() {
    let history: Vec<AttemptRecord> = Vec::new();
    let b = breaker();

    assert!(b.should_stop(&history, "r", "u", 3, None, None).is_none());

    let trip = b.should_stop(&history, "r", "u", 4, None, None).unwrap();
    assert_eq!(trip.reason, TripReason::MaxAttempts);
    assert!(trip.detail.contains("attempt 4"));
}

#[test]
fn consecutive_identical_errors_trip() {
    let history = vec![failed(1, "boom"), failed(2, "boom")];
    let trip = breaker()
        .should_stop(&history, "r", "u", 3, Some("boom"), None)
        .unwrap();
    assert_eq!(trip.reason, TripReason::ErrorRepeated);
}

#[test]
fn a_different_error_breaks_the_streak() {
    let history = vec![failed(1, "boom"), failed(2, "other")];
    assert!(breaker()
        .should_stop(&history, "r", "u", 3, Some("boom"), None)
        .is_none());
}

#[test]
fn single_previous_error_is_below_threshold() {
    let history = vec![failed(1, "boom")];
    assert!(breaker()
        .should_stop(&history, "r", "u", 2, Some("boom"), None)
        .is_none());
}

#[test]
fn recurring_output_anywhere_in_history_trips() {
    // Not consecutive: A, B, A.
    let history = vec![produced(1, "A"), produced(2, "B"), produced(3, "A")];
    let b = CircuitBreaker::new(&BreakerConfig {
        max_attempts: 10,
        ..BreakerConfig::default()
    });

    let trip = b.should_stop(&history, "r", "u", 4, None, Some("A")).unwrap();
    assert_eq!(trip.reason, TripReason::Oscillation);
    assert!(b.should_stop(&history, "r", "u", 4, None, Some("B")).is_none());
}

#[test]
fn max_attempts_is_checked_first() {
    let history = vec![failed(1, "boom"), failed(2, "boom"), failed(3, "boom")];
    let trip = breaker()
        .should_stop(&history, "r", "u", 4, Some("boom"), None)
        .unwrap();
    assert_eq!(trip.reason, TripReason::MaxAttempts);
}

#[test]
fn signatures_ignore_volatile_detail() {
    let a = ErrorSignature::from_message("panic at 0xdeadbeef in /tmp/build-12/src/lib.rs:42");
    let b = ErrorSignature::from_message("panic at 0x1f2e in /tmp/build-97/src/main.rs:7");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "panic at 0x? in <path>:N");

    let spaced = ErrorSignature::from_message("  timed   out after 30s\n");
    assert_eq!(spaced.as_str(), "timed out after Ns");

    let quoted = ErrorSignature::from_message("cannot open \"C:\\work\\a.txt\"");
    assert_eq!(quoted.as_str(), "cannot open <path>");
}

#[test]
fn signatures_are_bounded() {
    let long = "x".repeat(MAX_SIGNATURE_LEN * 2);
    let sig = ErrorSignature::from_message(&long);
    assert_eq!(sig.as_str().chars().count(), MAX_SIGNATURE_LEN);
}

#[test]
fn fingerprint_is_stable_and_content_sensitive() {
    assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
    assert_ne!(fingerprint(b"hello"), fingerprint(b"hello\n"));
    assert_eq!(fingerprint(b"").len(), 64);
}
