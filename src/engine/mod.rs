// src/engine/mod.rs

//! Orchestration engine.
//!
//! Closes the loop between the other components: waves from the scheduler
//! are driven through the worker pool, every attempt is recorded in the
//! ledger, and failed attempts are retried only with the circuit breaker's
//! consent.
//!
//! The pure decision logic lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::collections::BTreeMap;
use std::fmt;

use crate::breaker::Trip;
use crate::ledger::RunState;

pub mod core;
pub mod runtime;

pub use runtime::Orchestrator;

/// How a unit ended within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOutcome {
    Succeeded,
    Failed,
    Quarantined,
    Canceled,
    /// Never started because a dependency did not succeed.
    Blocked,
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitOutcome::Succeeded => "succeeded",
            UnitOutcome::Failed => "failed",
            UnitOutcome::Quarantined => "quarantined",
            UnitOutcome::Canceled => "canceled",
            UnitOutcome::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit_id: String,
    pub outcome: UnitOutcome,
    /// Attempts made in this execution (0 for blocked units).
    pub attempts: u32,
    pub trip: Option<Trip>,
    pub last_error: Option<String>,
}

/// Result of executing a plan under a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub waves_executed: usize,
    pub units: BTreeMap<String, UnitReport>,
}

impl RunReport {
    pub fn outcome_of(&self, unit_id: &str) -> Option<UnitOutcome> {
        self.units.get(unit_id).map(|u| u.outcome)
    }

    pub fn count(&self, outcome: UnitOutcome) -> usize {
        self.units.values().filter(|u| u.outcome == outcome).count()
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }
}
