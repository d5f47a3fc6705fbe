// src/ledger/recorder.rs

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use ulid::Generator;

use crate::breaker::{AttemptHistory, AttemptRecord};
use crate::dag::WorkstreamBundle;
use crate::errors::{Result, WorkstreamError};
use crate::ledger::model::{EventType, LedgerEvent, Run, StepAttempt, StepCompletion};
use crate::ledger::state::{RunState, StepState};
use crate::ledger::store::{LedgerStore, MemoryLedgerStore};
use crate::sync::lock_recover;

/// Run/step ledger.
///
/// Every mutation is validated against the state tables, written to the
/// store and recorded as an event, all while holding one gate, so two
/// callers can never both pass validation against the same old state.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    /// Serializes validate-then-write and owns the id generator.
    gate: Mutex<Generator>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            gate: Mutex::new(Generator::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Record a new pending run over `bundles`.
    pub fn create_run(&self, bundles: Vec<WorkstreamBundle>) -> Result<Run> {
        let mut ids = lock_recover(&self.gate);
        let run_id = format!("run-{}", next_ulid(&mut ids)?);
        let now = Utc::now();
        let run = Run {
            run_id: run_id.clone(),
            state: RunState::Pending,
            bundles,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_run(&run)?;
        self.emit(
            EventType::RunCreated,
            &run_id,
            None,
            json!({ "state": run.state, "bundles": run.bundles.len() }),
        )?;

        info!(run_id = %run_id, bundles = run.bundles.len(), "run created");
        Ok(run)
    }

    /// `pending -> running`.
    pub fn start_run(&self, run_id: &str) -> Result<Run> {
        self.transition_run(run_id, RunState::Running)
    }

    pub fn transition_run(&self, run_id: &str, next: RunState) -> Result<Run> {
        let _gate = lock_recover(&self.gate);
        let mut run = self.require_run(run_id)?;
        let from = run.state;
        if !from.can_transition_to(next) {
            return Err(WorkstreamError::InvalidTransition {
                entity: "run",
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        run.state = next;
        run.updated_at = Utc::now();
        self.store.update_run(&run)?;
        self.emit(
            EventType::RunTransition,
            run_id,
            None,
            json!({ "from": from, "to": next }),
        )?;

        info!(run_id = %run_id, %from, to = %next, "run transition");
        Ok(run)
    }

    /// Record a new running attempt at `unit_id`.
    ///
    /// The run must be `running`. Sequence numbers count all steps of the
    /// run; attempt numbers count the steps of this unit.
    pub fn start_step(
        &self,
        run_id: &str,
        unit_id: &str,
        tool_id: &str,
        worker_id: Option<&str>,
    ) -> Result<StepAttempt> {
        let mut ids = lock_recover(&self.gate);
        let run = self.require_run(run_id)?;
        if run.state != RunState::Running {
            return Err(WorkstreamError::InvalidTransition {
                entity: "step",
                from: format!("run {}", run.state),
                to: StepState::Running.to_string(),
            });
        }

        let existing = self.store.steps_for_run(run_id)?;
        let sequence = existing.iter().map(|s| s.sequence).max().unwrap_or(0) + 1;
        let attempt = existing.iter().filter(|s| s.unit_id == unit_id).count() as u32 + 1;

        let step = StepAttempt {
            step_id: format!("step-{}", next_ulid(&mut ids)?),
            run_id: run_id.to_string(),
            unit_id: unit_id.to_string(),
            sequence,
            attempt,
            tool_id: tool_id.to_string(),
            worker_id: worker_id.map(str::to_string),
            state: StepState::Running,
            exit_code: None,
            error_signature: None,
            content_hash: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        self.store.insert_step(&step)?;
        self.emit(
            EventType::StepStarted,
            run_id,
            Some(&step.step_id),
            json!({
                "unit_id": unit_id,
                "sequence": sequence,
                "attempt": attempt,
                "tool_id": tool_id,
                "worker_id": worker_id,
            }),
        )?;

        debug!(run_id = %run_id, unit = %unit_id, step_id = %step.step_id, attempt, "step started");
        Ok(step)
    }

    /// Move a running step to a terminal state, recording its outcome data.
    pub fn finish_step(
        &self,
        step_id: &str,
        next: StepState,
        completion: StepCompletion,
    ) -> Result<StepAttempt> {
        let _gate = lock_recover(&self.gate);
        let mut step = self
            .store
            .get_step(step_id)?
            .ok_or_else(|| WorkstreamError::StepNotFound(step_id.to_string()))?;
        let from = step.state;
        if !from.can_transition_to(next) {
            return Err(WorkstreamError::InvalidTransition {
                entity: "step",
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        step.state = next;
        step.exit_code = completion.exit_code;
        step.error_signature = completion.error_signature;
        step.content_hash = completion.content_hash;
        step.finished_at = Some(Utc::now());

        self.store.update_step(&step)?;
        self.emit(
            EventType::StepTransition,
            &step.run_id,
            Some(step_id),
            json!({
                "from": from,
                "to": next,
                "exit_code": step.exit_code,
                "error_signature": step.error_signature,
                "content_hash": step.content_hash,
            }),
        )?;

        debug!(run_id = %step.run_id, unit = %step.unit_id, step_id = %step_id, %from, to = %next, "step transition");
        Ok(step)
    }

    /// Terminal transition without outcome data.
    pub fn transition_step(&self, step_id: &str, next: StepState) -> Result<StepAttempt> {
        self.finish_step(step_id, next, StepCompletion::default())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.store.get_run(run_id)
    }

    pub fn get_step(&self, step_id: &str) -> Result<Option<StepAttempt>> {
        self.store.get_step(step_id)
    }

    pub fn list_runs(&self) -> Result<Vec<Run>> {
        self.store.list_runs()
    }

    pub fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepAttempt>> {
        self.store.steps_for_run(run_id)
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<LedgerEvent>> {
        self.store.events_for_run(run_id)
    }

    /// All attempts at one unit, oldest first.
    pub fn unit_attempts(&self, run_id: &str, unit_id: &str) -> Result<Vec<StepAttempt>> {
        Ok(self
            .store
            .steps_for_run(run_id)?
            .into_iter()
            .filter(|s| s.unit_id == unit_id)
            .collect())
    }

    /// Rebuild a run's state from its events alone.
    pub fn replay_run(&self, run_id: &str) -> Result<RunState> {
        let mut state = None;
        for event in self.store.events_for_run(run_id)? {
            match event.event_type {
                EventType::RunCreated => state = Some(RunState::Pending),
                EventType::RunTransition => {
                    let to = event
                        .payload
                        .get("to")
                        .cloned()
                        .map(serde_json::from_value::<RunState>)
                        .transpose()?;
                    match to {
                        Some(to) => state = Some(to),
                        None => warn!(run_id = %run_id, "run transition event without target state"),
                    }
                }
                EventType::StepStarted | EventType::StepTransition => {}
            }
        }
        state.ok_or_else(|| WorkstreamError::RunNotFound(run_id.to_string()))
    }

    fn require_run(&self, run_id: &str) -> Result<Run> {
        self.store
            .get_run(run_id)?
            .ok_or_else(|| WorkstreamError::RunNotFound(run_id.to_string()))
    }

    fn emit(
        &self,
        event_type: EventType,
        run_id: &str,
        step_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let event = LedgerEvent {
            event_type,
            run_id: run_id.to_string(),
            step_id: step_id.map(str::to_string),
            timestamp: Utc::now(),
            payload,
        };
        self.store.append_event(&event)
    }
}

impl AttemptHistory for Ledger {
    fn attempts(&self, run_id: &str, unit_id: &str) -> Vec<AttemptRecord> {
        match self.unit_attempts(run_id, unit_id) {
            Ok(steps) => steps
                .into_iter()
                .filter(|s| s.state.is_terminal())
                .map(|s| AttemptRecord {
                    attempt: s.attempt,
                    error_signature: s.error_signature,
                    content_hash: s.content_hash,
                })
                .collect(),
            Err(e) => {
                warn!(run_id = %run_id, unit = %unit_id, error = %e, "attempt history unavailable");
                Vec::new()
            }
        }
    }
}

fn next_ulid(ids: &mut Generator) -> Result<ulid::Ulid> {
    ids.generate()
        .map_err(|e| anyhow::anyhow!("id generation failed: {e}").into())
}
