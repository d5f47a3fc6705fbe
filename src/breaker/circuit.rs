// src/breaker/circuit.rs

use std::fmt;

use tracing::{debug, info};

use crate::breaker::BreakerConfig;

/// One recorded attempt at a unit, as seen by the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error_signature: Option<String>,
    pub content_hash: Option<String>,
}

/// Read-only view of past attempts.
pub trait AttemptHistory {
    /// Finished attempts at `unit_id` within `run_id`, oldest first.
    fn attempts(&self, run_id: &str, unit_id: &str) -> Vec<AttemptRecord>;
}

/// In-memory history, handy when no ledger is involved.
impl AttemptHistory for Vec<AttemptRecord> {
    fn attempts(&self, _run_id: &str, _unit_id: &str) -> Vec<AttemptRecord> {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    MaxAttempts,
    ErrorRepeated,
    Oscillation,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripReason::MaxAttempts => "max attempts",
            TripReason::ErrorRepeated => "error repeated",
            TripReason::Oscillation => "oscillation",
        };
        f.write_str(s)
    }
}

/// Why the breaker says to stop retrying a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub reason: TripReason,
    pub detail: String,
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Advisory retry gate.
///
/// The breaker holds no state of its own; every verdict is derived from the
/// history it is handed plus the current attempt's data.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Decide whether `attempt` at `unit_id` should not be made.
    ///
    /// Checks run in order and the first match wins:
    /// 1. `attempt` exceeds `max_attempts`
    /// 2. the most recent attempts share `error_signature` at least
    ///    `max_error_repeats` times in a row
    /// 3. `content_hash` appears at least `oscillation_threshold` times
    ///    anywhere in the history
    pub fn should_stop(
        &self,
        history: &dyn AttemptHistory,
        run_id: &str,
        unit_id: &str,
        attempt: u32,
        error_signature: Option<&str>,
        content_hash: Option<&str>,
    ) -> Option<Trip> {
        let trip = self.evaluate(history, run_id, unit_id, attempt, error_signature, content_hash);
        match &trip {
            Some(t) => info!(run_id, unit = unit_id, attempt, reason = %t.reason, detail = %t.detail, "circuit breaker tripped"),
            None => debug!(run_id, unit = unit_id, attempt, "circuit breaker allows retry"),
        }
        trip
    }

    fn evaluate(
        &self,
        history: &dyn AttemptHistory,
        run_id: &str,
        unit_id: &str,
        attempt: u32,
        error_signature: Option<&str>,
        content_hash: Option<&str>,
    ) -> Option<Trip> {
        if attempt > self.config.max_attempts {
            return Some(Trip {
                reason: TripReason::MaxAttempts,
                detail: format!(
                    "attempt {attempt} exceeds max_attempts {}",
                    self.config.max_attempts
                ),
            });
        }

        if error_signature.is_none() && content_hash.is_none() {
            return None;
        }
        let records = history.attempts(run_id, unit_id);

        if let Some(sig) = error_signature {
            let repeats = records
                .iter()
                .rev()
                .take_while(|r| r.error_signature.as_deref() == Some(sig))
                .count();
            if repeats >= self.config.max_error_repeats {
                return Some(Trip {
                    reason: TripReason::ErrorRepeated,
                    detail: format!("error '{sig}' repeated {repeats} times in a row"),
                });
            }
        }

        if let Some(hash) = content_hash {
            let seen = records
                .iter()
                .filter(|r| r.content_hash.as_deref() == Some(hash))
                .count();
            if seen >= self.config.oscillation_threshold {
                return Some(Trip {
                    reason: TripReason::Oscillation,
                    detail: format!("content hash {hash} produced {seen} times"),
                });
            }
        }

        None
    }
}
