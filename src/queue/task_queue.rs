// src/queue/task_queue.rs

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};
use ulid::{Generator, Ulid};

use crate::errors::{Result, WorkstreamError};
use crate::fs::{list_json_files, read_json, write_json_atomic};
use crate::queue::lock::TaskLock;
use crate::queue::task::{Partition, QueueCounts, QueuedTask};
use crate::queue::QueueConfig;
use crate::sync::lock_recover;

/// Durable file-backed queue with four partitions.
///
/// ```text
/// <root>/inbox/<id>.json
/// <root>/running/<id>.json
/// <root>/done/<id>.json
/// <root>/failed/<id>.json
/// <root>/locks/<id>.lock
/// ```
///
/// A move updates the record in place in its current partition and then
/// renames it into the next one, so each record lives in exactly one
/// directory at every instant.
pub struct TaskQueue {
    config: QueueConfig,
    ids: Mutex<Generator>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Open (and create, if needed) a queue rooted at `config.root`.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        for partition in Partition::ALL {
            let dir = config.root.join(partition.dir_name());
            fs::create_dir_all(&dir).with_context(|| format!("creating dir {:?}", dir))?;
        }
        let locks = config.root.join("locks");
        fs::create_dir_all(&locks).with_context(|| format!("creating dir {:?}", locks))?;

        debug!(root = ?config.root, "task queue opened");
        Ok(Self {
            config: config.clone(),
            ids: Mutex::new(Generator::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Write a new task into the inbox.
    pub fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<QueuedTask> {
        let id = self.next_task_id()?;
        self.enqueue_with_id(&id, kind, payload)
    }

    /// Reserve a fresh task id without writing anything.
    ///
    /// Ids are monotonic ULIDs, so records sort by creation order.
    pub fn next_task_id(&self) -> Result<String> {
        let id = lock_recover(&self.ids)
            .generate()
            .map_err(|e| anyhow::anyhow!("task id generation failed: {e}"))?;
        Ok(id.to_string())
    }

    /// Write a new task into the inbox under an id from [`next_task_id`].
    ///
    /// [`next_task_id`]: TaskQueue::next_task_id
    pub fn enqueue_with_id(
        &self,
        id: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<QueuedTask> {
        if !is_task_id(id) {
            return Err(WorkstreamError::InvalidTask(format!(
                "'{id}' is not a queue task id"
            )));
        }

        let _lock = self.lock(id)?;
        if let Some(partition) = self.locate(id)? {
            return Err(WorkstreamError::InvalidTask(format!(
                "task {id} already exists in '{partition}'"
            )));
        }

        let task = QueuedTask {
            id: id.to_string(),
            kind: kind.to_string(),
            payload,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        write_json_atomic(&self.record_path(Partition::Inbox, id), &task)?;

        info!(task_id = %id, kind = %kind, "task enqueued");
        Ok(task)
    }

    /// Peek at the oldest readable inbox record without removing it.
    pub fn dequeue(&self) -> Result<Option<QueuedTask>> {
        for path in list_json_files(&self.partition_dir(Partition::Inbox))? {
            match read_json::<QueuedTask>(&path) {
                Ok(task) => return Ok(Some(task)),
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable inbox record"),
            }
        }
        Ok(None)
    }

    /// inbox -> running
    pub fn move_to_running(&self, task_id: &str) -> Result<QueuedTask> {
        self.transfer(task_id, Partition::Inbox, Partition::Running, |task| {
            task.started_at = Some(Utc::now());
        })
    }

    /// running -> done, recording `result`.
    pub fn complete(&self, task_id: &str, result: Option<serde_json::Value>) -> Result<QueuedTask> {
        self.transfer(task_id, Partition::Running, Partition::Done, |task| {
            task.finished_at = Some(Utc::now());
            task.result = result;
        })
    }

    /// running -> failed, recording `error`.
    pub fn fail(&self, task_id: &str, error: &str) -> Result<QueuedTask> {
        self.transfer(task_id, Partition::Running, Partition::Failed, |task| {
            task.finished_at = Some(Utc::now());
            task.error = Some(error.to_string());
        })
    }

    /// failed -> inbox, clearing the previous outcome.
    pub fn requeue(&self, task_id: &str) -> Result<QueuedTask> {
        self.transfer(task_id, Partition::Failed, Partition::Inbox, |task| {
            task.started_at = None;
            task.finished_at = None;
            task.result = None;
            task.error = None;
        })
    }

    pub fn get(&self, task_id: &str) -> Result<Option<QueuedTask>> {
        match self.locate(task_id)? {
            Some(partition) => read_json(&self.record_path(partition, task_id)).map(Some),
            None => Ok(None),
        }
    }

    /// Partition currently holding `task_id`.
    pub fn locate(&self, task_id: &str) -> Result<Option<Partition>> {
        if !is_task_id(task_id) {
            return Ok(None);
        }
        Ok(Partition::ALL
            .into_iter()
            .find(|p| self.record_path(*p, task_id).is_file()))
    }

    /// Readable records of one partition, oldest first.
    pub fn list(&self, partition: Partition) -> Result<Vec<QueuedTask>> {
        let mut tasks = Vec::new();
        for path in list_json_files(&self.partition_dir(partition))? {
            match read_json::<QueuedTask>(&path) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable queue record"),
            }
        }
        Ok(tasks)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for partition in Partition::ALL {
            for _ in list_json_files(&self.partition_dir(partition))? {
                counts.bump(partition);
            }
        }
        Ok(counts)
    }

    /// Remove lock files nobody holds for tasks that are finished or gone.
    /// Returns how many were removed.
    pub fn prune_locks(&self) -> Result<usize> {
        let dir = self.lock_dir();
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir).with_context(|| format!("reading dir {:?}", dir))? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "lock") {
                continue;
            }
            let Some(task_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let finished = self.locate(&task_id)?.is_none_or(Partition::is_finished);
            if !finished {
                continue;
            }
            if let Some(lock) = TaskLock::try_acquire(&dir, &task_id)? {
                fs::remove_file(&path).with_context(|| format!("removing {:?}", path))?;
                drop(lock);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "pruned task locks");
        }
        Ok(removed)
    }

    fn transfer(
        &self,
        task_id: &str,
        from: Partition,
        to: Partition,
        update: impl FnOnce(&mut QueuedTask),
    ) -> Result<QueuedTask> {
        if !is_task_id(task_id) {
            return Err(WorkstreamError::TaskNotFound(task_id.to_string()));
        }
        let _lock = self.lock(task_id)?;

        let src = self.record_path(from, task_id);
        if !src.is_file() {
            return Err(match self.locate(task_id)? {
                Some(actual) => WorkstreamError::WrongPartition {
                    task_id: task_id.to_string(),
                    expected: from.to_string(),
                    actual: actual.to_string(),
                },
                None => WorkstreamError::TaskNotFound(task_id.to_string()),
            });
        }

        let mut task: QueuedTask = read_json(&src)?;
        update(&mut task);
        write_json_atomic(&src, &task)?;

        let dst = self.record_path(to, task_id);
        fs::rename(&src, &dst).with_context(|| format!("renaming {:?} -> {:?}", src, dst))?;

        info!(task_id = %task_id, %from, %to, "task moved");
        Ok(task)
    }

    fn lock(&self, task_id: &str) -> Result<TaskLock> {
        TaskLock::acquire(&self.lock_dir(), task_id, self.config.lock_timeout)
    }

    fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.config.root.join(partition.dir_name())
    }

    fn lock_dir(&self) -> PathBuf {
        self.config.root.join("locks")
    }

    fn record_path(&self, partition: Partition, task_id: &str) -> PathBuf {
        self.partition_dir(partition).join(format!("{task_id}.json"))
    }
}

fn is_task_id(task_id: &str) -> bool {
    Ulid::from_string(task_id).is_ok()
}
