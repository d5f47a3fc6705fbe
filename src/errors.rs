// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Variants fall into the classes the engine cares about:
//! - definitional (bad bundles or config): fatal before anything runs
//! - capacity (pool full, lock timeout): retryable, caller backs off
//! - transition (invalid state change): invariant violation, never coerced
//! - lookup (unknown worker/run/step/task): typed, expected failures

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkstreamError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Duplicate bundle id: {0}")]
    DuplicateBundle(String),

    #[error("Bundle '{bundle}' depends on unknown bundle '{missing}'")]
    MissingDependency { bundle: String, missing: String },

    #[error("Cycle detected between bundles: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Worker pool is full ({cap} workers)")]
    PoolFull { cap: usize },

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Timed out after {waited_ms}ms waiting for lock on task {task_id}")]
    LockTimeout { task_id: String, waited_ms: u64 },

    #[error("Task {task_id} is in partition '{actual}', expected '{expected}'")]
    WrongPartition {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("No execution adapter registered for type '{0}'")]
    AdapterNotFound(String),

    #[error("Execution adapter '{0}' is not available")]
    AdapterUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkstreamError {
    /// Capacity failures: the caller may back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkstreamError::PoolFull { .. } | WorkstreamError::LockTimeout { .. }
        )
    }

    /// Failures in the submitted bundle set or config, reported before any
    /// scheduling happens.
    pub fn is_definitional(&self) -> bool {
        matches!(
            self,
            WorkstreamError::Config(_)
                | WorkstreamError::InvalidBundle(_)
                | WorkstreamError::DuplicateBundle(_)
                | WorkstreamError::MissingDependency { .. }
                | WorkstreamError::Cycle(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkstreamError>;
