// src/ledger/store.rs

//! Storage backends for runs, steps and the event log.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::{Result, WorkstreamError};
use crate::fs::{append_line, list_json_files, read_json, write_json_atomic};
use crate::ledger::model::{LedgerEvent, Run, StepAttempt};
use crate::sync::lock_recover;

/// Abstract storage behind the [`Ledger`](crate::ledger::Ledger).
///
/// Validation happens in the ledger; a store only persists what it is given.
/// Runs and steps are never deleted and events are only appended.
pub trait LedgerStore: Send + Sync {
    fn insert_run(&self, run: &Run) -> Result<()>;
    fn update_run(&self, run: &Run) -> Result<()>;
    fn get_run(&self, run_id: &str) -> Result<Option<Run>>;
    fn list_runs(&self) -> Result<Vec<Run>>;

    fn insert_step(&self, step: &StepAttempt) -> Result<()>;
    fn update_step(&self, step: &StepAttempt) -> Result<()>;
    fn get_step(&self, step_id: &str) -> Result<Option<StepAttempt>>;
    /// Steps of a run ordered by `sequence`.
    fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepAttempt>>;

    fn append_event(&self, event: &LedgerEvent) -> Result<()>;
    /// Events of a run in append order.
    fn events_for_run(&self, run_id: &str) -> Result<Vec<LedgerEvent>>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    runs: BTreeMap<String, Run>,
    steps: BTreeMap<String, StepAttempt>,
    events: Vec<LedgerEvent>,
}

/// In-memory ledger storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all runs.
    pub fn event_count(&self) -> usize {
        lock_recover(&self.inner).events.len()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        lock_recover(&self.inner)
            .runs
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn update_run(&self, run: &Run) -> Result<()> {
        let mut inner = lock_recover(&self.inner);
        match inner.runs.get_mut(&run.run_id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(WorkstreamError::RunNotFound(run.run_id.clone())),
        }
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(lock_recover(&self.inner).runs.get(run_id).cloned())
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        Ok(lock_recover(&self.inner).runs.values().cloned().collect())
    }

    fn insert_step(&self, step: &StepAttempt) -> Result<()> {
        lock_recover(&self.inner)
            .steps
            .insert(step.step_id.clone(), step.clone());
        Ok(())
    }

    fn update_step(&self, step: &StepAttempt) -> Result<()> {
        let mut inner = lock_recover(&self.inner);
        match inner.steps.get_mut(&step.step_id) {
            Some(slot) => {
                *slot = step.clone();
                Ok(())
            }
            None => Err(WorkstreamError::StepNotFound(step.step_id.clone())),
        }
    }

    fn get_step(&self, step_id: &str) -> Result<Option<StepAttempt>> {
        Ok(lock_recover(&self.inner).steps.get(step_id).cloned())
    }

    fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepAttempt>> {
        let inner = lock_recover(&self.inner);
        let mut steps: Vec<StepAttempt> = inner
            .steps
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.sequence);
        Ok(steps)
    }

    fn append_event(&self, event: &LedgerEvent) -> Result<()> {
        lock_recover(&self.inner).events.push(event.clone());
        Ok(())
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<LedgerEvent>> {
        Ok(lock_recover(&self.inner)
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

/// File-backed ledger storage.
///
/// ```text
/// <root>/runs/<run_id>.json
/// <root>/steps/<step_id>.json
/// <root>/events.jsonl
/// ```
pub struct FileLedgerStore {
    root: PathBuf,
    // Serializes appends so concurrent writers never interleave lines.
    events_lock: Mutex<()>,
}

impl FileLedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            events_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn steps_dir(&self) -> PathBuf {
        self.root.join("steps")
    }

    fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    fn step_path(&self, step_id: &str) -> PathBuf {
        self.steps_dir().join(format!("{step_id}.json"))
    }
}

impl LedgerStore for FileLedgerStore {
    fn insert_run(&self, run: &Run) -> Result<()> {
        write_json_atomic(&self.run_path(&run.run_id), run)?;
        debug!(run_id = %run.run_id, state = %run.state, "stored run (file)");
        Ok(())
    }

    fn update_run(&self, run: &Run) -> Result<()> {
        let path = self.run_path(&run.run_id);
        if !path.exists() {
            return Err(WorkstreamError::RunNotFound(run.run_id.clone()));
        }
        write_json_atomic(&path, run)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for path in list_json_files(&self.runs_dir())? {
            match read_json::<Run>(&path) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable run record"),
            }
        }
        Ok(runs)
    }

    fn insert_step(&self, step: &StepAttempt) -> Result<()> {
        write_json_atomic(&self.step_path(&step.step_id), step)
    }

    fn update_step(&self, step: &StepAttempt) -> Result<()> {
        let path = self.step_path(&step.step_id);
        if !path.exists() {
            return Err(WorkstreamError::StepNotFound(step.step_id.clone()));
        }
        write_json_atomic(&path, step)
    }

    fn get_step(&self, step_id: &str) -> Result<Option<StepAttempt>> {
        let path = self.step_path(step_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepAttempt>> {
        let mut steps = Vec::new();
        for path in list_json_files(&self.steps_dir())? {
            match read_json::<StepAttempt>(&path) {
                Ok(step) if step.run_id == run_id => steps.push(step),
                Ok(_) => {}
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable step record"),
            }
        }
        steps.sort_by_key(|s| s.sequence);
        Ok(steps)
    }

    fn append_event(&self, event: &LedgerEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = lock_recover(&self.events_lock);
        append_line(&self.events_path(), &line)
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<LedgerEvent>> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("reading file {:?}", path))?;

        let mut events = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEvent>(line) {
                Ok(event) if event.run_id == run_id => events.push(event),
                Ok(_) => {}
                // A torn final line after a crash is the expected case here.
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping unreadable event line"),
            }
        }
        Ok(events)
    }
}
