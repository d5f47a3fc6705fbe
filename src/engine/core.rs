// src/engine/core.rs

//! Pure decision core.
//!
//! Everything here is synchronous and deterministic: given an attempt's
//! outcome and the unit's history it says what the ledger should record and
//! whether the orchestrator may try again. The async shell
//! (`engine::runtime::Orchestrator`) does the IO around it.

use std::collections::BTreeMap;

use crate::breaker::{AttemptHistory, CircuitBreaker, ErrorSignature, Trip, TripReason};
use crate::dag::WorkstreamBundle;
use crate::exec::ExecutionOutcome;
use crate::ledger::{RunState, StepCompletion, StepState};

use super::UnitOutcome;

/// What to do after an attempt has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDecision {
    /// The breaker consents to another attempt.
    Retry,
    /// The unit is finished with `outcome`.
    Stop {
        outcome: UnitOutcome,
        trip: Option<Trip>,
    },
}

/// Terminal step state for an attempt's outcome.
pub fn step_state_for(outcome: &ExecutionOutcome) -> StepState {
    if outcome.canceled {
        StepState::Canceled
    } else if outcome.success {
        StepState::Succeeded
    } else {
        StepState::Failed
    }
}

/// Ledger data for an attempt's outcome.
///
/// Failed attempts always carry an error signature; one without a message
/// is signed by its exit code.
pub fn completion_for(outcome: &ExecutionOutcome) -> StepCompletion {
    let error_signature = if outcome.success || outcome.canceled {
        None
    } else {
        let message = match (&outcome.error, outcome.exit_code) {
            (Some(msg), _) => msg.clone(),
            (None, Some(code)) => format!("exit code {code}"),
            (None, None) => "failed".to_string(),
        };
        Some(ErrorSignature::from_message(&message).into_string())
    };

    StepCompletion {
        exit_code: outcome.exit_code,
        error_signature,
        content_hash: outcome.content_hash.clone(),
    }
}

/// Decide the next move once attempt `attempt` has been recorded.
///
/// The breaker is asked about attempt `attempt + 1`. Exhausting attempts
/// fails the unit; a repeated error or recurring output quarantines it.
pub fn decide(
    breaker: &CircuitBreaker,
    history: &dyn AttemptHistory,
    run_id: &str,
    unit_id: &str,
    attempt: u32,
    state: StepState,
    completion: &StepCompletion,
) -> AttemptDecision {
    match state {
        StepState::Succeeded => AttemptDecision::Stop {
            outcome: UnitOutcome::Succeeded,
            trip: None,
        },
        StepState::Canceled | StepState::Running => AttemptDecision::Stop {
            outcome: UnitOutcome::Canceled,
            trip: None,
        },
        StepState::Failed => {
            let trip = breaker.should_stop(
                history,
                run_id,
                unit_id,
                attempt + 1,
                completion.error_signature.as_deref(),
                completion.content_hash.as_deref(),
            );
            match trip {
                None => AttemptDecision::Retry,
                Some(trip) => {
                    let outcome = match trip.reason {
                        TripReason::MaxAttempts => UnitOutcome::Failed,
                        TripReason::ErrorRepeated | TripReason::Oscillation => {
                            UnitOutcome::Quarantined
                        }
                    };
                    AttemptDecision::Stop {
                        outcome,
                        trip: Some(trip),
                    }
                }
            }
        }
    }
}

/// A bundle is blocked when any dependency that is part of this execution
/// ended in anything but success.
pub fn blocked_by<'a>(
    bundle: &'a WorkstreamBundle,
    outcomes: &BTreeMap<String, UnitOutcome>,
) -> Option<&'a str> {
    bundle
        .depends_on
        .iter()
        .find(|dep| outcomes.get(*dep).is_some_and(|o| *o != UnitOutcome::Succeeded))
        .map(String::as_str)
}

/// Final run state from unit outcomes.
///
/// Quarantine wins over failure, failure (including blocked units) over
/// cancellation; only all-succeeded yields `succeeded`.
pub fn final_run_state<'a>(outcomes: impl IntoIterator<Item = &'a UnitOutcome>) -> RunState {
    let mut state = RunState::Succeeded;
    for outcome in outcomes {
        state = match (state, outcome) {
            (_, UnitOutcome::Quarantined) | (RunState::Quarantined, _) => RunState::Quarantined,
            (_, UnitOutcome::Failed | UnitOutcome::Blocked) | (RunState::Failed, _) => {
                RunState::Failed
            }
            (_, UnitOutcome::Canceled) | (RunState::Canceled, _) => RunState::Canceled,
            _ => state,
        };
    }
    state
}
