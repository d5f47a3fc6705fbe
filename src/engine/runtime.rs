// src/engine/runtime.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, ErrorSignature};
use crate::dag::{ExecutionPlan, WaveScheduler, WorkstreamBundle};
use crate::errors::{Result, WorkstreamError};
use crate::exec::{AdapterRegistry, ExecutionAdapter, ExecutionOutcome, ExecutionRequest};
use crate::ledger::{Ledger, StepAttempt, StepCompletion, StepState};
use crate::pool::{WorkerId, WorkerPool, WorkerState};
use crate::queue::TaskQueue;
use crate::sync::lock_recover;

use super::core::{
    blocked_by, completion_for, decide, final_run_state, step_state_for, AttemptDecision,
};
use super::{RunReport, UnitOutcome, UnitReport};

/// How long a unit waits for pool capacity before giving up.
pub const DEFAULT_CAPACITY_WAIT: Duration = Duration::from_secs(30);

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Drives execution plans through the worker pool.
///
/// Waves run strictly in order; the units of one wave run concurrently in
/// a `JoinSet`, each holding one worker per attempt. The pool and ledger
/// are shared with the unit tasks; neither lock is held across an await,
/// and queue file IO runs on the blocking pool outside the pool lock.
///
/// Errors inside a unit end that unit as `failed`; they never abort its
/// siblings or leave the run open.
pub struct Orchestrator {
    pool: Arc<Mutex<WorkerPool>>,
    ledger: Arc<Ledger>,
    registry: AdapterRegistry,
    breaker: CircuitBreaker,
    queue: Option<Arc<TaskQueue>>,
    default_adapter: String,
    max_workers: usize,
    capacity_wait: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("breaker", &self.breaker)
            .field("default_adapter", &self.default_adapter)
            .field("max_workers", &self.max_workers)
            .field("capacity_wait", &self.capacity_wait)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        pool: WorkerPool,
        ledger: Arc<Ledger>,
        registry: AdapterRegistry,
        breaker: CircuitBreaker,
    ) -> Self {
        let default_adapter = pool.config().default_adapter.clone();
        let max_workers = pool.max_workers();
        Self {
            pool: Arc::new(Mutex::new(pool)),
            ledger,
            registry,
            breaker,
            queue: None,
            default_adapter,
            max_workers,
            capacity_wait: DEFAULT_CAPACITY_WAIT,
        }
    }

    /// Track every attempt as a task in `queue`; workers then carry queue
    /// task ids instead of step ids.
    pub fn with_queue(mut self, queue: Arc<TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// How long a unit backs off on a full pool before it fails.
    pub fn with_capacity_wait(mut self, wait: Duration) -> Self {
        self.capacity_wait = wait;
        self
    }

    pub fn pool(&self) -> Arc<Mutex<WorkerPool>> {
        Arc::clone(&self.pool)
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }

    pub fn queue(&self) -> Option<Arc<TaskQueue>> {
        self.queue.clone()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Plan `bundles`, open a run for them and execute it.
    ///
    /// Definitional problems (cycles, unknown dependencies, missing
    /// adapters) fail here before a run is created.
    pub async fn run_bundles(&self, bundles: Vec<WorkstreamBundle>) -> Result<RunReport> {
        let plan = WaveScheduler::new(self.max_workers)?.plan(&bundles)?;
        self.ensure_adapters(&plan)?;

        let run = self.ledger.create_run(bundles)?;
        self.ledger.start_run(&run.run_id)?;
        self.execute_plan(&run.run_id, &plan).await
    }

    /// Execute `plan` under an existing running run and close the run.
    ///
    /// A missing adapter is reported before anything executes and leaves
    /// the run untouched. Once execution starts the run always ends in a
    /// terminal state.
    pub async fn execute_plan(&self, run_id: &str, plan: &ExecutionPlan) -> Result<RunReport> {
        self.ensure_adapters(plan)?;

        let units = self.execute_waves(run_id, plan).await;
        let state = final_run_state(units.values().map(|u| &u.outcome));
        self.ledger.transition_run(run_id, state)?;
        info!(run_id = %run_id, %state, units = units.len(), "run finished");

        Ok(RunReport {
            run_id: run_id.to_string(),
            state,
            waves_executed: plan.waves.len(),
            units,
        })
    }

    /// Every unit of the plan ends up in the returned map; unit errors are
    /// folded into `failed` reports.
    async fn execute_waves(&self, run_id: &str, plan: &ExecutionPlan) -> BTreeMap<String, UnitReport> {
        let mut outcomes: BTreeMap<String, UnitOutcome> = BTreeMap::new();
        let mut units: BTreeMap<String, UnitReport> = BTreeMap::new();

        for wave in &plan.waves {
            info!(run_id = %run_id, wave = wave.index, units = wave.len(), "executing wave");
            let mut set = JoinSet::new();
            let mut spawned = HashMap::new();

            for id in &wave.bundle_ids {
                let Some(bundle) = plan.bundle(id) else {
                    warn!(run_id = %run_id, unit = %id, "wave member missing from plan; skipping");
                    continue;
                };

                if let Some(dep) = blocked_by(bundle, &outcomes) {
                    info!(run_id = %run_id, unit = %id, dependency = %dep, "unit blocked by unsuccessful dependency");
                    outcomes.insert(id.clone(), UnitOutcome::Blocked);
                    units.insert(
                        id.clone(),
                        UnitReport {
                            unit_id: id.clone(),
                            outcome: UnitOutcome::Blocked,
                            attempts: 0,
                            trip: None,
                            last_error: Some(format!("dependency '{dep}' did not succeed")),
                        },
                    );
                    continue;
                }

                match self.unit_runner(run_id, bundle) {
                    Ok(unit) => {
                        let handle = set.spawn(unit.run());
                        spawned.insert(handle.id(), id.clone());
                    }
                    Err(e) => {
                        warn!(run_id = %run_id, unit = %id, error = %e, "could not start unit");
                        outcomes.insert(id.clone(), UnitOutcome::Failed);
                        units.insert(id.clone(), UnitReport::errored(id, 0, &e));
                    }
                }
            }

            while let Some(joined) = set.join_next_with_id().await {
                let report = match joined {
                    Ok((_, report)) => report,
                    Err(e) => {
                        let Some(unit_id) = spawned.get(&e.id()).cloned() else {
                            error!(run_id = %run_id, error = %e, "unknown unit task did not complete");
                            continue;
                        };
                        warn!(run_id = %run_id, unit = %unit_id, error = %e, "unit task did not complete");
                        UnitReport::errored(
                            &unit_id,
                            0,
                            &WorkstreamError::Other(anyhow::anyhow!("unit task did not complete: {e}")),
                        )
                    }
                };
                debug!(run_id = %run_id, unit = %report.unit_id, outcome = %report.outcome, "unit finished");
                outcomes.insert(report.unit_id.clone(), report.outcome);
                units.insert(report.unit_id.clone(), report);
            }
        }

        units
    }

    fn ensure_adapters(&self, plan: &ExecutionPlan) -> Result<()> {
        let types: BTreeSet<&str> = plan
            .bundles()
            .map(|b| b.adapter_or(&self.default_adapter))
            .collect();
        self.registry.ensure_available(types)
    }

    fn unit_runner(&self, run_id: &str, bundle: &WorkstreamBundle) -> Result<UnitRunner> {
        let adapter_type = bundle.adapter_or(&self.default_adapter).to_string();
        Ok(UnitRunner {
            run_id: run_id.to_string(),
            bundle: bundle.clone(),
            adapter: self.registry.get(&adapter_type)?,
            adapter_type,
            pool: Arc::clone(&self.pool),
            ledger: Arc::clone(&self.ledger),
            breaker: self.breaker.clone(),
            queue: self.queue.clone(),
            capacity_wait: self.capacity_wait,
        })
    }
}

impl UnitReport {
    fn errored(unit_id: &str, attempts: u32, error: &WorkstreamError) -> Self {
        UnitReport {
            unit_id: unit_id.to_string(),
            outcome: UnitOutcome::Failed,
            attempts,
            trip: None,
            last_error: Some(error.to_string()),
        }
    }
}

/// Everything one unit task needs, owned so the task is `'static`.
struct UnitRunner {
    run_id: String,
    bundle: WorkstreamBundle,
    adapter: Arc<dyn ExecutionAdapter>,
    adapter_type: String,
    pool: Arc<Mutex<WorkerPool>>,
    ledger: Arc<Ledger>,
    breaker: CircuitBreaker,
    queue: Option<Arc<TaskQueue>>,
    capacity_wait: Duration,
}

/// A worker holding one attempt.
struct Claim {
    worker_id: WorkerId,
    task_id: String,
    step: StepAttempt,
}

impl UnitRunner {
    /// Run attempts until the unit settles. Errors end the unit `failed`.
    async fn run(self) -> UnitReport {
        let unit_id = self.bundle.id.clone();
        let mut attempts = 0;

        loop {
            let (claim, cancel) = match self.begin_attempt().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(run_id = %self.run_id, unit = %unit_id, error = %e, "could not start attempt; unit failed");
                    return UnitReport::errored(&unit_id, attempts, &e);
                }
            };
            attempts += 1;

            let request = ExecutionRequest {
                run_id: self.run_id.clone(),
                unit_id: unit_id.clone(),
                attempt: claim.step.attempt,
                worker_id: claim.worker_id.clone(),
                command: self.bundle.command.clone(),
                cancel,
            };
            let outcome = match self.adapter.execute(request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(run_id = %self.run_id, unit = %unit_id, error = %e, "adapter error; counting attempt as failed");
                    ExecutionOutcome::failed(None, e.to_string())
                }
            };

            let decision = match self.settle_attempt(&claim, &outcome).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(run_id = %self.run_id, unit = %unit_id, error = %e, "could not record attempt; unit failed");
                    return UnitReport::errored(&unit_id, attempts, &e);
                }
            };

            match decision {
                AttemptDecision::Retry => {
                    info!(run_id = %self.run_id, unit = %unit_id, attempt = claim.step.attempt, "attempt failed; retrying");
                }
                AttemptDecision::Stop { outcome: unit_outcome, trip } => {
                    return UnitReport {
                        unit_id,
                        outcome: unit_outcome,
                        attempts,
                        trip,
                        last_error: outcome.error,
                    };
                }
            }
        }
    }

    /// Claim a worker and open the attempt's step, then its queue task.
    async fn begin_attempt(&self) -> Result<(Claim, oneshot::Receiver<()>)> {
        let (claim, cancel) = self.claim_worker().await?;

        if let Some(queue) = &self.queue {
            let payload = json!({
                "run_id": self.run_id,
                "unit_id": self.bundle.id,
                "step_id": claim.step.step_id,
                "attempt": claim.step.attempt,
            });
            if let Err(e) = open_queue_task(queue, &claim.task_id, payload).await {
                self.abandon(&claim, &e);
                return Err(e);
            }
        }

        Ok((claim, cancel))
    }

    /// Take a worker and mark it busy, backing off while the pool is full.
    async fn claim_worker(&self) -> Result<(Claim, oneshot::Receiver<()>)> {
        let started = Instant::now();
        let mut backoff = BACKOFF_START;

        loop {
            {
                let mut pool = lock_recover(&self.pool);
                match acquire_worker(&mut pool, &self.adapter_type) {
                    Ok(worker_id) => return self.occupy(&mut pool, worker_id),
                    Err(e) if e.is_retryable() && started.elapsed() < self.capacity_wait => {
                        debug!(run_id = %self.run_id, unit = %self.bundle.id, error = %e, backoff_ms = backoff.as_millis() as u64, "no worker available; backing off");
                    }
                    Err(e) => return Err(e),
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Open a step on `worker_id` and make the worker busy with it.
    ///
    /// Once the step exists, a later failure closes it before returning.
    fn occupy(
        &self,
        pool: &mut WorkerPool,
        worker_id: WorkerId,
    ) -> Result<(Claim, oneshot::Receiver<()>)> {
        let step = self.ledger.start_step(
            &self.run_id,
            &self.bundle.id,
            &self.adapter_type,
            Some(&worker_id),
        )?;

        let task_id = match &self.queue {
            Some(queue) => queue.next_task_id(),
            None => Ok(step.step_id.clone()),
        };
        let task_id = match task_id.and_then(|id| pool.assign_task(&worker_id, &id).map(|()| id)) {
            Ok(id) => id,
            Err(e) => {
                fail_step(&self.ledger, &step, &e);
                return Err(e);
            }
        };

        let claim = Claim {
            worker_id,
            task_id,
            step,
        };
        let (tx, rx) = oneshot::channel();
        if let Err(e) = pool.attach_teardown(&claim.worker_id, tx) {
            fail_step(&self.ledger, &claim.step, &e);
            release(pool, &claim.worker_id);
            return Err(e);
        }
        Ok((claim, rx))
    }

    /// Close a claim whose attempt never ran.
    fn abandon(&self, claim: &Claim, cause: &WorkstreamError) {
        fail_step(&self.ledger, &claim.step, cause);
        release(&mut lock_recover(&self.pool), &claim.worker_id);
    }

    /// Record the attempt, settle its queue task, hand the worker back and
    /// ask the breaker what comes next.
    ///
    /// The worker is released even when recording fails.
    async fn settle_attempt(
        &self,
        claim: &Claim,
        outcome: &ExecutionOutcome,
    ) -> Result<AttemptDecision> {
        let state = step_state_for(outcome);
        let completion = completion_for(outcome);
        let recorded = self
            .ledger
            .finish_step(&claim.step.step_id, state, completion.clone());

        if let Some(queue) = &self.queue {
            settle_queue_task(queue, &claim.task_id, outcome).await;
        }
        release(&mut lock_recover(&self.pool), &claim.worker_id);
        recorded?;

        Ok(decide(
            &self.breaker,
            self.ledger.as_ref(),
            &self.run_id,
            &self.bundle.id,
            claim.step.attempt,
            state,
            &completion,
        ))
    }
}

/// inbox then running, on the blocking pool.
async fn open_queue_task(
    queue: &Arc<TaskQueue>,
    task_id: &str,
    payload: serde_json::Value,
) -> Result<()> {
    let queue = Arc::clone(queue);
    let task_id = task_id.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        queue.enqueue_with_id(&task_id, "unit", payload)?;
        queue.move_to_running(&task_id)?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!("queue task setup did not complete: {e}"))?
}

/// Move the attempt's task to `done` or `failed`, on the blocking pool.
async fn settle_queue_task(queue: &Arc<TaskQueue>, task_id: &str, outcome: &ExecutionOutcome) {
    let queue = Arc::clone(queue);
    let id = task_id.to_string();
    let success = outcome.success;
    let result = json!({
        "exit_code": outcome.exit_code,
        "content_hash": outcome.content_hash,
    });
    let error = match (&outcome.error, outcome.canceled) {
        (Some(e), _) => e.clone(),
        (None, true) => "canceled".to_string(),
        (None, false) => "failed".to_string(),
    };

    let settled = tokio::task::spawn_blocking(move || {
        if success {
            queue.complete(&id, Some(result)).map(drop)
        } else {
            queue.fail(&id, &error).map(drop)
        }
    })
    .await;
    match settled {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "could not settle queue task"),
        Err(e) => warn!(task_id = %task_id, error = %e, "queue settle did not complete"),
    }
}

/// Fail a step that will never run to completion.
fn fail_step(ledger: &Ledger, step: &StepAttempt, cause: &WorkstreamError) {
    let completion = StepCompletion {
        exit_code: None,
        error_signature: Some(ErrorSignature::from_message(&cause.to_string()).into_string()),
        content_hash: None,
    };
    if let Err(e) = ledger.finish_step(&step.step_id, StepState::Failed, completion) {
        warn!(step_id = %step.step_id, error = %e, "could not fail abandoned step");
    }
}

/// Hand a busy worker back; workers torn down meanwhile are left alone.
fn release(pool: &mut WorkerPool, worker_id: &str) {
    match pool.get(worker_id).map(|w| w.state) {
        Some(WorkerState::Busy) => {
            if let Err(e) = pool.release_worker(worker_id) {
                warn!(worker_id = %worker_id, error = %e, "could not release worker");
            }
        }
        state => debug!(worker_id = %worker_id, ?state, "worker no longer busy; not releasing"),
    }
}

/// An idle worker of `adapter_type`, spawning one if needed.
///
/// At capacity, an idle or draining worker of another type is terminated
/// to make room.
fn acquire_worker(pool: &mut WorkerPool, adapter_type: &str) -> Result<WorkerId> {
    if let Some(worker) = pool.get_idle_worker(Some(adapter_type)) {
        return Ok(worker.worker_id.clone());
    }

    match pool.spawn_worker(adapter_type) {
        Err(WorkstreamError::PoolFull { cap }) => {
            let victim = pool
                .workers()
                .find(|w| matches!(w.state, WorkerState::Idle | WorkerState::Draining))
                .map(|w| w.worker_id.clone());
            match victim {
                Some(victim) => {
                    debug!(worker_id = %victim, adapter = %adapter_type, "recycling worker for another adapter type");
                    pool.terminate_worker(&victim)?;
                    pool.spawn_worker(adapter_type)
                }
                None => Err(WorkstreamError::PoolFull { cap }),
            }
        }
        other => other,
    }
}
