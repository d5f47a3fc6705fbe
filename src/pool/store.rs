// src/pool/store.rs

//! Persistence for worker records.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::fs::{list_json_files, read_json, write_json_atomic};
use crate::pool::worker::{Worker, WorkerId};
use crate::sync::lock_recover;

/// Abstract storage for worker records.
///
/// Records are only ever inserted or overwritten: a terminated worker stays
/// on record in the TERMINATED state.
pub trait WorkerStore: Send {
    fn load_all(&self) -> Result<Vec<Worker>>;
    fn save(&mut self, worker: &Worker) -> Result<()>;
}

/// Stores one JSON file per worker under a directory.
pub struct FileWorkerStore {
    dir: PathBuf,
}

impl FileWorkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl WorkerStore for FileWorkerStore {
    fn load_all(&self) -> Result<Vec<Worker>> {
        let mut workers = Vec::new();
        for path in list_json_files(&self.dir)? {
            match read_json::<Worker>(&path) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable worker record"),
            }
        }
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        debug!(count = workers.len(), dir = ?self.dir, "loaded worker records (file)");
        Ok(workers)
    }

    fn save(&mut self, worker: &Worker) -> Result<()> {
        write_json_atomic(&self.path_for(&worker.worker_id), worker)?;
        debug!(worker_id = %worker.worker_id, state = %worker.state, "stored worker (file)");
        Ok(())
    }
}

/// Stores worker records in memory.
///
/// Clones share the same map, so a test can keep a handle and hand a clone
/// to a pool, then rebuild a second pool from it to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkerStore {
    workers: Arc<Mutex<BTreeMap<WorkerId, Worker>>>,
}

impl MemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerStore for MemoryWorkerStore {
    fn load_all(&self) -> Result<Vec<Worker>> {
        Ok(lock_recover(&self.workers).values().cloned().collect())
    }

    fn save(&mut self, worker: &Worker) -> Result<()> {
        lock_recover(&self.workers).insert(worker.worker_id.clone(), worker.clone());
        Ok(())
    }
}
