// src/queue/lock.rs

//! Per-task advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use fs2::FileExt;
use tracing::{debug, warn};

use crate::errors::{Result, WorkstreamError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock on `<root>/locks/<task_id>.lock`, released on drop.
#[derive(Debug)]
pub struct TaskLock {
    file: File,
    path: PathBuf,
}

impl TaskLock {
    /// Poll for the lock until `timeout` has passed.
    pub fn acquire(lock_dir: &Path, task_id: &str, timeout: Duration) -> Result<Self> {
        let path = lock_dir.join(format!("{task_id}.lock"));
        Self::acquire_path(path, task_id, timeout)
    }

    /// Single non-blocking attempt; `None` if someone else holds it.
    pub fn try_acquire(lock_dir: &Path, task_id: &str) -> Result<Option<Self>> {
        let path = lock_dir.join(format!("{task_id}.lock"));
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn acquire_path(path: PathBuf, task_id: &str, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(&path)?;
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(task_id = %task_id, waited_ms = started.elapsed().as_millis() as u64, "task lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        warn!(task_id = %task_id, waited_ms = waited.as_millis() as u64, "timed out waiting for task lock");
                        return Err(WorkstreamError::LockTimeout {
                            task_id: task_id.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = ?self.path, error = %e, "failed to release task lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("opening lock file {:?}", path))?;
    Ok(file)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
