// src/pool/worker.rs

//! Worker record and its lifecycle table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical worker identifier type.
pub type WorkerId = String;

/// Lifecycle state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Spawning,
    Idle,
    Busy,
    Draining,
    Terminated,
}

impl WorkerState {
    /// The fixed transition table.
    ///
    /// ```text
    /// SPAWNING -> IDLE | TERMINATED
    /// IDLE     -> BUSY | DRAINING | TERMINATED
    /// BUSY     -> IDLE | TERMINATED
    /// DRAINING -> TERMINATED
    /// ```
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Spawning, Idle)
                | (Spawning, Terminated)
                | (Idle, Busy)
                | (Idle, Draining)
                | (Idle, Terminated)
                | (Busy, Idle)
                | (Busy, Terminated)
                | (Draining, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Terminated
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Spawning => "SPAWNING",
            WorkerState::Idle => "IDLE",
            WorkerState::Busy => "BUSY",
            WorkerState::Draining => "DRAINING",
            WorkerState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker slot owned by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: WorkerId,
    pub adapter_type: String,
    pub state: WorkerState,
    /// Task the worker is executing while BUSY.
    pub current_task_id: Option<String>,
    pub heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set by `drain_worker` on a BUSY worker: on release it moves to
    /// DRAINING instead of rejoining the idle set.
    #[serde(default)]
    pub drain_requested: bool,
}

impl Worker {
    pub(crate) fn spawning(worker_id: WorkerId, adapter_type: String, now: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            adapter_type,
            state: WorkerState::Spawning,
            current_task_id: None,
            heartbeat_at: now,
            created_at: now,
            drain_requested: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}
