// src/pool/worker_pool.rs

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Generator;

use crate::errors::{Result, WorkstreamError};
use crate::pool::store::WorkerStore;
use crate::pool::worker::{Worker, WorkerId, WorkerState};
use crate::pool::PoolConfig;

/// Snapshot of worker counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub spawning: usize,
    pub idle: usize,
    pub busy: usize,
    pub draining: usize,
    pub terminated: usize,
}

impl PoolCounts {
    pub fn live(&self) -> usize {
        self.spawning + self.idle + self.busy + self.draining
    }
}

/// Bounded set of worker slots.
///
/// The pool is the only owner of [`Worker`] records. Every state change goes
/// through [`WorkerPool::transition`], which validates against the fixed
/// table and persists the new record *before* updating memory, so a rejected
/// or failed change never leaves the pool and the store disagreeing.
pub struct WorkerPool {
    config: PoolConfig,
    /// Keyed by ULID-based id, so iteration order is creation order.
    workers: BTreeMap<WorkerId, Worker>,
    /// Idle workers available for assignment, oldest first.
    idle: VecDeque<WorkerId>,
    /// Teardown handles for whatever a busy worker is running.
    teardown: HashMap<WorkerId, oneshot::Sender<()>>,
    store: Box<dyn WorkerStore>,
    ids: Generator,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("workers", &self.workers)
            .field("idle", &self.idle)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create an empty pool backed by `store`.
    pub fn new(config: &PoolConfig, store: Box<dyn WorkerStore>) -> Self {
        Self {
            config: config.clone(),
            workers: BTreeMap::new(),
            idle: VecDeque::new(),
            teardown: HashMap::new(),
            store,
            ids: Generator::new(),
        }
    }

    /// Rebuild a pool from whatever `store` holds (e.g. after a restart).
    ///
    /// Workers come back in their persisted state. BUSY workers are left as
    /// they are; repairing them is the recovery manager's job.
    pub fn load(config: &PoolConfig, store: Box<dyn WorkerStore>) -> Result<Self> {
        let mut pool = Self::new(config, store);
        for worker in pool.store.load_all()? {
            if worker.state == WorkerState::Idle {
                pool.idle.push_back(worker.worker_id.clone());
            }
            pool.workers.insert(worker.worker_id.clone(), worker);
        }
        info!(
            workers = pool.workers.len(),
            idle = pool.idle.len(),
            "worker pool loaded from store"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn get(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.get(worker_id)
    }

    /// All workers ever spawned, including terminated ones.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn workers_in_state(&self, state: WorkerState) -> Vec<&Worker> {
        self.workers.values().filter(|w| w.state == state).collect()
    }

    pub fn live_count(&self) -> usize {
        self.workers.values().filter(|w| w.is_live()).count()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for w in self.workers.values() {
            match w.state {
                WorkerState::Spawning => counts.spawning += 1,
                WorkerState::Idle => counts.idle += 1,
                WorkerState::Busy => counts.busy += 1,
                WorkerState::Draining => counts.draining += 1,
                WorkerState::Terminated => counts.terminated += 1,
            }
        }
        counts
    }

    /// Start a new worker for `adapter_type` and make it available.
    ///
    /// Fails with `PoolFull` once `max_workers` live workers exist.
    pub fn spawn_worker(&mut self, adapter_type: &str) -> Result<WorkerId> {
        let cap = self.config.max_workers;
        if self.live_count() >= cap {
            return Err(WorkstreamError::PoolFull { cap });
        }

        let ulid = self
            .ids
            .generate()
            .map_err(|e| anyhow::anyhow!("worker id generation failed: {e}"))?;
        let worker_id = format!("worker-{ulid}");
        let worker = Worker::spawning(worker_id.clone(), adapter_type.to_string(), Utc::now());

        self.store.save(&worker)?;
        self.workers.insert(worker_id.clone(), worker);

        self.transition(&worker_id, WorkerState::Idle, |_| {})?;
        self.idle.push_back(worker_id.clone());

        info!(worker_id = %worker_id, adapter = %adapter_type, "spawned worker");
        Ok(worker_id)
    }

    /// Give an IDLE worker a task.
    pub fn assign_task(&mut self, worker_id: &str, task_id: &str) -> Result<()> {
        let now = Utc::now();
        self.transition(worker_id, WorkerState::Busy, |w| {
            w.current_task_id = Some(task_id.to_string());
            w.heartbeat_at = now;
        })?;
        self.idle.retain(|id| id != worker_id);

        debug!(worker_id = %worker_id, task_id = %task_id, "assigned task to worker");
        Ok(())
    }

    /// Return a BUSY worker to the idle set.
    ///
    /// If a drain was requested while the worker was busy, it moves on to
    /// DRAINING instead and is not offered for new work.
    pub fn release_worker(&mut self, worker_id: &str) -> Result<()> {
        let now = Utc::now();
        self.transition(worker_id, WorkerState::Idle, |w| {
            w.current_task_id = None;
            w.heartbeat_at = now;
        })?;
        self.teardown.remove(worker_id);

        let drain = self
            .workers
            .get(worker_id)
            .is_some_and(|w| w.drain_requested);

        if drain {
            self.transition(worker_id, WorkerState::Draining, |w| {
                w.drain_requested = false;
            })?;
            debug!(worker_id = %worker_id, "released worker moved to DRAINING");
        } else if !self.idle.iter().any(|id| id == worker_id) {
            self.idle.push_back(worker_id.to_string());
            debug!(worker_id = %worker_id, "released worker back to idle set");
        }

        Ok(())
    }

    /// Alias for [`WorkerPool::release_worker`], used when the assigned task
    /// reached an outcome.
    pub fn complete_task(&mut self, worker_id: &str) -> Result<()> {
        self.release_worker(worker_id)
    }

    /// Stop offering a worker for new work without interrupting it.
    ///
    /// IDLE workers move to DRAINING immediately. BUSY workers keep running
    /// and move to DRAINING when released.
    pub fn drain_worker(&mut self, worker_id: &str) -> Result<()> {
        let state = self.state_of(worker_id)?;

        if state == WorkerState::Busy {
            let mut updated = self.require(worker_id)?.clone();
            updated.drain_requested = true;
            self.store.save(&updated)?;
            self.workers.insert(worker_id.to_string(), updated);
            info!(worker_id = %worker_id, "drain requested for busy worker");
            return Ok(());
        }

        self.transition(worker_id, WorkerState::Draining, |_| {})?;
        self.idle.retain(|id| id != worker_id);
        info!(worker_id = %worker_id, "worker draining");
        Ok(())
    }

    /// Move a worker to TERMINATED and tear down whatever it is running.
    pub fn terminate_worker(&mut self, worker_id: &str) -> Result<()> {
        self.transition(worker_id, WorkerState::Terminated, |w| {
            w.current_task_id = None;
            w.drain_requested = false;
        })?;
        self.idle.retain(|id| id != worker_id);

        if let Some(cancel) = self.teardown.remove(worker_id) {
            if cancel.send(()).is_err() {
                debug!(worker_id = %worker_id, "teardown receiver already gone");
            }
        }

        info!(worker_id = %worker_id, "worker terminated");
        Ok(())
    }

    /// Register the handle that tears down a busy worker's execution.
    pub fn attach_teardown(&mut self, worker_id: &str, cancel: oneshot::Sender<()>) -> Result<()> {
        let state = self.state_of(worker_id)?;
        if state != WorkerState::Busy {
            warn!(worker_id = %worker_id, %state, "teardown attached to non-busy worker");
        }
        self.teardown.insert(worker_id.to_string(), cancel);
        Ok(())
    }

    /// First idle worker, optionally restricted to an adapter type.
    pub fn get_idle_worker(&self, adapter_type: Option<&str>) -> Option<&Worker> {
        self.idle
            .iter()
            .filter_map(|id| self.workers.get(id))
            .find(|w| adapter_type.is_none_or(|a| w.adapter_type == a))
    }

    /// Record that a worker is alive.
    pub fn heartbeat(&mut self, worker_id: &str) -> Result<()> {
        self.heartbeat_at(worker_id, Utc::now())
    }

    pub fn heartbeat_at(&mut self, worker_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut updated = self.require(worker_id)?.clone();
        updated.heartbeat_at = at;
        self.store.save(&updated)?;
        self.workers.insert(worker_id.to_string(), updated);
        Ok(())
    }

    /// Live workers whose last heartbeat is older than the configured
    /// timeout. Staleness is reported only; nothing is terminated.
    pub fn check_heartbeats(&self) -> Vec<WorkerId> {
        self.check_heartbeats_at(Utc::now(), self.config.heartbeat_timeout)
    }

    pub fn check_heartbeats_at(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<WorkerId> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.is_live() && now.signed_duration_since(w.heartbeat_at) > timeout)
            .map(|w| w.worker_id.clone())
            .collect();

        if !stale.is_empty() {
            warn!(?stale, "workers missed their heartbeat");
        }
        stale
    }

    fn require(&self, worker_id: &str) -> Result<&Worker> {
        self.workers
            .get(worker_id)
            .ok_or_else(|| WorkstreamError::WorkerNotFound(worker_id.to_string()))
    }

    fn state_of(&self, worker_id: &str) -> Result<WorkerState> {
        Ok(self.require(worker_id)?.state)
    }

    /// Validated, persisted state change.
    ///
    /// `update` adjusts the other fields of the new record. The store is
    /// written first; memory is only touched once the write succeeded.
    fn transition(
        &mut self,
        worker_id: &str,
        next: WorkerState,
        update: impl FnOnce(&mut Worker),
    ) -> Result<()> {
        let current = self.require(worker_id)?;
        if !current.state.can_transition_to(next) {
            return Err(WorkstreamError::InvalidTransition {
                entity: "worker",
                from: current.state.to_string(),
                to: next.to_string(),
            });
        }

        let mut updated = current.clone();
        let from = updated.state;
        updated.state = next;
        update(&mut updated);

        self.store.save(&updated)?;
        self.workers.insert(worker_id.to_string(), updated);

        debug!(worker_id = %worker_id, %from, to = %next, "worker transition");
        Ok(())
    }
}
