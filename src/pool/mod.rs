// src/pool/mod.rs

//! Bounded worker pool.
//!
//! - [`worker`] defines the worker record and its transition table.
//! - [`worker_pool`] owns the workers, the idle set and teardown handles.
//! - [`store`] persists worker records (file or memory), so a restarted
//!   process can find workers that were BUSY when it died.

pub mod store;
pub mod worker;
pub mod worker_pool;

use std::time::Duration;

pub use store::{FileWorkerStore, MemoryWorkerStore, WorkerStore};
pub use worker::{Worker, WorkerId, WorkerState};
pub use worker_pool::{PoolCounts, WorkerPool};

/// Default heartbeat staleness threshold.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Pool settings derived from `[pool]`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_workers: usize,
    pub heartbeat_timeout: Duration,
    pub default_adapter: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            default_adapter: "process".to_string(),
        }
    }
}
