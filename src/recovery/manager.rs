// src/recovery/manager.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::dag::{WaveScheduler, WorkstreamBundle};
use crate::engine::{Orchestrator, RunReport};
use crate::errors::{Result, WorkstreamError};
use crate::ledger::{Run, RunState, StepCompletion, StepState};
use crate::pool::{WorkerId, WorkerState};
use crate::queue::{Partition, TaskQueue};
use crate::sync::lock_recover;

/// Error signature recorded on steps whose worker vanished in a crash.
pub const ORPHANED_SIGNATURE: &str = "orphaned: worker lost";

/// Error signature recorded on steps still running when their run resumes.
pub const RESUMED_SIGNATURE: &str = "interrupted: run resumed";

/// What [`RecoveryManager::recover_from_crash`] found and repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub orphaned_count: usize,
    /// Workers found BUSY.
    pub orphaned_ids: Vec<WorkerId>,
    /// Orphans actually moved to TERMINATED.
    pub recovered_worker_count: usize,
    /// Task ids the orphans held, now failed.
    pub failed_units: Vec<String>,
}

/// Repairs state left behind by a crash and resumes interrupted runs.
#[derive(Debug)]
pub struct RecoveryManager {
    orchestrator: Arc<Orchestrator>,
    queue: Option<Arc<TaskQueue>>,
}

impl RecoveryManager {
    /// Recovery over the orchestrator's pool and ledger. If the
    /// orchestrator tracks attempts in a task queue, orphaned tasks in its
    /// `running` partition are failed too.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let queue = orchestrator.queue();
        Self {
            orchestrator,
            queue,
        }
    }

    /// Terminate every BUSY worker and fail the work it held.
    ///
    /// Meant to run once at startup, before anything is scheduled: at that
    /// point no BUSY worker can have a live execution behind it.
    pub fn recover_from_crash(&self) -> Result<RecoveryReport> {
        let pool = self.orchestrator.pool();
        let mut report = RecoveryReport::default();
        let mut task_ids = BTreeSet::new();

        {
            let mut pool = lock_recover(&pool);
            let orphans: Vec<(WorkerId, Option<String>)> = pool
                .workers_in_state(WorkerState::Busy)
                .into_iter()
                .map(|w| (w.worker_id.clone(), w.current_task_id.clone()))
                .collect();

            for (worker_id, task_id) in orphans {
                warn!(worker_id = %worker_id, task_id = ?task_id, "orphaned busy worker");
                report.orphaned_ids.push(worker_id.clone());
                match pool.terminate_worker(&worker_id) {
                    Ok(()) => report.recovered_worker_count += 1,
                    Err(e) => warn!(worker_id = %worker_id, error = %e, "could not terminate orphaned worker"),
                }
                if let Some(task_id) = task_id {
                    task_ids.insert(task_id.clone());
                    report.failed_units.push(task_id);
                }
            }
        }
        report.orphaned_count = report.orphaned_ids.len();

        if report.orphaned_count > 0 {
            let workers: BTreeSet<&str> = report.orphaned_ids.iter().map(String::as_str).collect();
            self.fail_orphaned_steps(&workers, &task_ids)?;
            self.fail_orphaned_tasks(&task_ids)?;
        }

        info!(
            orphaned = report.orphaned_count,
            recovered = report.recovered_worker_count,
            failed = report.failed_units.len(),
            "crash recovery complete"
        );
        Ok(report)
    }

    /// Non-terminal runs with work left: a step still running, or a
    /// bundle without a successful attempt. Newest first.
    pub fn get_recoverable_runs(&self) -> Result<Vec<Run>> {
        let ledger = self.orchestrator.ledger();
        let mut recoverable = Vec::new();

        for run in ledger.list_runs()? {
            if run.state.is_terminal() {
                continue;
            }
            let steps = ledger.steps_for_run(&run.run_id)?;
            let running = steps.iter().any(|s| !s.state.is_terminal());
            let succeeded: BTreeSet<&str> = steps
                .iter()
                .filter(|s| s.state == StepState::Succeeded)
                .map(|s| s.unit_id.as_str())
                .collect();
            let unfinished = run.bundles.iter().any(|b| !succeeded.contains(b.id.as_str()));

            if running || unfinished {
                recoverable.push(run);
            }
        }

        recoverable.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(recoverable)
    }

    /// Replan and execute what `run_id` has not finished, under the same
    /// run id.
    ///
    /// Still-running steps are failed first. Bundles that already succeeded
    /// are dropped and the remaining ones no longer wait on them.
    pub async fn resume_execution(&self, run_id: &str, max_workers: usize) -> Result<RunReport> {
        let ledger = self.orchestrator.ledger();
        let run = ledger
            .get_run(run_id)?
            .ok_or_else(|| WorkstreamError::RunNotFound(run_id.to_string()))?;
        if run.state.is_terminal() {
            return Err(WorkstreamError::InvalidTransition {
                entity: "run",
                from: run.state.to_string(),
                to: RunState::Running.to_string(),
            });
        }

        let steps = ledger.steps_for_run(run_id)?;
        for step in steps.iter().filter(|s| s.state == StepState::Running) {
            ledger.finish_step(
                &step.step_id,
                StepState::Failed,
                StepCompletion {
                    error_signature: Some(RESUMED_SIGNATURE.to_string()),
                    ..StepCompletion::default()
                },
            )?;
        }

        let succeeded: BTreeSet<String> = steps
            .iter()
            .filter(|s| s.state == StepState::Succeeded)
            .map(|s| s.unit_id.clone())
            .collect();
        let remaining = remaining_bundles(&run.bundles, &succeeded);

        let cap = max_workers.min(self.orchestrator.max_workers());
        if cap < max_workers {
            warn!(requested = max_workers, cap, "resume capped at pool size");
        }
        let plan = WaveScheduler::new(cap)?.plan(&remaining)?;

        if run.state == RunState::Pending {
            ledger.start_run(run_id)?;
        }
        info!(
            run_id = %run_id,
            done = succeeded.len(),
            remaining = remaining.len(),
            waves = plan.waves.len(),
            "resuming run"
        );
        self.orchestrator.execute_plan(run_id, &plan).await
    }

    fn fail_orphaned_steps(&self, workers: &BTreeSet<&str>, task_ids: &BTreeSet<String>) -> Result<()> {
        let ledger = self.orchestrator.ledger();
        for run in ledger.list_runs()? {
            for step in ledger.steps_for_run(&run.run_id)? {
                if step.state != StepState::Running {
                    continue;
                }
                let held = step
                    .worker_id
                    .as_deref()
                    .is_some_and(|w| workers.contains(w))
                    || task_ids.contains(&step.step_id);
                if !held {
                    continue;
                }
                ledger.finish_step(
                    &step.step_id,
                    StepState::Failed,
                    StepCompletion {
                        error_signature: Some(ORPHANED_SIGNATURE.to_string()),
                        ..StepCompletion::default()
                    },
                )?;
                info!(run_id = %run.run_id, unit = %step.unit_id, step_id = %step.step_id, "orphaned step failed");
            }
        }
        Ok(())
    }

    fn fail_orphaned_tasks(&self, task_ids: &BTreeSet<String>) -> Result<()> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        for task_id in task_ids {
            if queue.locate(task_id)? == Some(Partition::Running) {
                queue.fail(task_id, ORPHANED_SIGNATURE)?;
                info!(task_id = %task_id, "orphaned task failed");
            }
        }
        Ok(())
    }
}

/// Bundles without a successful attempt, with succeeded dependencies
/// removed.
fn remaining_bundles(bundles: &[WorkstreamBundle], succeeded: &BTreeSet<String>) -> Vec<WorkstreamBundle> {
    bundles
        .iter()
        .filter(|b| !succeeded.contains(&b.id))
        .cloned()
        .map(|mut b| {
            b.depends_on.retain(|dep| !succeeded.contains(dep));
            b
        })
        .collect()
}
