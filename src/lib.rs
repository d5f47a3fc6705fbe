// src/lib.rs

pub mod breaker;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod recovery;
pub mod sync;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use crate::engine::Orchestrator;

use crate::breaker::CircuitBreaker;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::exec::AdapterRegistry;
use crate::ledger::{FileLedgerStore, Ledger, LedgerStore, MemoryLedgerStore};
use crate::pool::{FileWorkerStore, MemoryWorkerStore, WorkerPool, WorkerStore};
use crate::queue::TaskQueue;
use crate::recovery::RecoveryManager;
use crate::types::StorageMode;

/// Components wired together from one validated config.
///
/// In `file` storage mode workers, the ledger and the task queue all live
/// under `[state].dir`, so a fresh process can pick up where a crashed one
/// stopped: build a `Workstream`, call
/// `recovery.recover_from_crash()`, then resume the runs
/// `recovery.get_recoverable_runs()` returns.
#[derive(Debug)]
pub struct Workstream {
    pub orchestrator: Arc<Orchestrator>,
    pub recovery: RecoveryManager,
    /// Present in `file` storage mode only.
    pub queue: Option<Arc<TaskQueue>>,
}

impl Workstream {
    /// Load and validate the config at `path`, then build from it.
    pub fn open(path: impl AsRef<Path>, registry: AdapterRegistry) -> Result<Self> {
        let cfg = load_and_validate(path)?;
        Self::from_config(&cfg, registry)
    }

    pub fn from_config(cfg: &ConfigFile, registry: AdapterRegistry) -> Result<Self> {
        let pool_config = cfg.pool_config();

        let (worker_store, ledger_store, queue): (
            Box<dyn WorkerStore>,
            Arc<dyn LedgerStore>,
            Option<Arc<TaskQueue>>,
        ) = match cfg.state.storage {
            StorageMode::File => (
                Box::new(FileWorkerStore::new(cfg.workers_dir())),
                Arc::new(FileLedgerStore::new(cfg.ledger_dir())),
                Some(Arc::new(TaskQueue::open(&cfg.queue_config())?)),
            ),
            StorageMode::Memory => (
                Box::new(MemoryWorkerStore::new()),
                Arc::new(MemoryLedgerStore::new()),
                None,
            ),
        };

        let pool = WorkerPool::load(&pool_config, worker_store)?;
        let ledger = Arc::new(Ledger::new(ledger_store));
        let breaker = CircuitBreaker::new(&cfg.breaker_config());

        let mut orchestrator = Orchestrator::new(pool, ledger, registry, breaker);
        if let Some(queue) = &queue {
            orchestrator = orchestrator.with_queue(Arc::clone(queue));
        }
        let orchestrator = Arc::new(orchestrator);
        let recovery = RecoveryManager::new(Arc::clone(&orchestrator));

        info!(
            storage = ?cfg.state.storage,
            state_dir = ?cfg.state.dir,
            max_workers = pool_config.max_workers,
            "workstream initialised"
        );

        Ok(Self {
            orchestrator,
            recovery,
            queue,
        })
    }
}
