// src/ledger/state.rs

//! Run and step state machines.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a run.
///
/// ```text
/// pending  -> running | canceled
/// running  -> succeeded | failed | quarantined | canceled
/// failed   -> quarantined
/// ```
///
/// `quarantined` is never reachable from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Quarantined,
    Canceled,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Canceled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Quarantined)
                | (Running, Canceled)
                | (Failed, Quarantined)
        )
    }

    /// `failed` is terminal for scheduling purposes even though it may
    /// still be escalated to `quarantined`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Quarantined => "quarantined",
            RunState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one step attempt.
///
/// ```text
/// running -> succeeded | failed | canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl StepState {
    pub fn can_transition_to(self, next: StepState) -> bool {
        self == StepState::Running && next != StepState::Running
    }

    pub fn is_terminal(self) -> bool {
        self != StepState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
            StepState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
