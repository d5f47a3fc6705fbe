// src/breaker/mod.rs

//! Circuit breaker and oscillation detector.
//!
//! Stops retrying a unit that keeps hitting the same error or keeps
//! producing output it has produced before.

pub mod circuit;
pub mod signature;

pub use circuit::{AttemptHistory, AttemptRecord, CircuitBreaker, Trip, TripReason};
pub use signature::{fingerprint, ErrorSignature};

/// Breaker thresholds derived from `[breaker]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub max_attempts: u32,
    pub max_error_repeats: usize,
    pub oscillation_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_error_repeats: 2,
            oscillation_threshold: 2,
        }
    }
}
