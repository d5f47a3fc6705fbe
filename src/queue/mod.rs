// src/queue/mod.rs

//! Durable four-partition file task queue.

pub mod lock;
pub mod task;
pub mod task_queue;

use std::path::PathBuf;
use std::time::Duration;

pub use lock::TaskLock;
pub use task::{Partition, QueueCounts, QueuedTask};
pub use task_queue::TaskQueue;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue settings derived from `[queue]` and `[state]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub root: PathBuf,
    pub lock_timeout: Duration,
}

impl QueueConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(".workstream/queue")
    }
}
