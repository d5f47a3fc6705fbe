// src/ledger/model.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::WorkstreamBundle;
use crate::ledger::state::{RunState, StepState};

pub type RunId = String;
pub type StepId = String;

/// One execution session over a bundle set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub state: RunState,
    /// The bundle set the run was started with. Resumption replans the
    /// part of it that has not succeeded yet.
    #[serde(default)]
    pub bundles: Vec<WorkstreamBundle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempt at one unit within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step_id: StepId,
    pub run_id: RunId,
    /// Bundle id this attempt executes.
    pub unit_id: String,
    /// Position among all steps of the run, starting at 1.
    pub sequence: u64,
    /// Attempt number for this unit, starting at 1.
    pub attempt: u32,
    /// Adapter that executed the attempt.
    pub tool_id: String,
    pub worker_id: Option<String>,
    pub state: StepState,
    pub exit_code: Option<i32>,
    pub error_signature: Option<String>,
    pub content_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome data written when a step leaves `running`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCompletion {
    pub exit_code: Option<i32>,
    pub error_signature: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunCreated,
    RunTransition,
    StepStarted,
    StepTransition,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::RunCreated => "run_created",
            EventType::RunTransition => "run_transition",
            EventType::StepStarted => "step_started",
            EventType::StepTransition => "step_transition",
        };
        f.write_str(s)
    }
}

/// Immutable record of one ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_type: EventType,
    pub run_id: RunId,
    pub step_id: Option<StepId>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}
