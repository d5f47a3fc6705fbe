// src/exec/adapter.rs

//! Pluggable execution adapter abstraction.
//!
//! The orchestrator hands each unit attempt to an `ExecutionAdapter` chosen
//! by the bundle's adapter type. Production code uses
//! [`ProcessAdapter`](crate::exec::ProcessAdapter); tests register a fake
//! that scripts outcomes without spawning processes.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::errors::Result;

/// Everything an adapter needs to run one attempt.
#[derive(Debug)]
pub struct ExecutionRequest {
    pub run_id: String,
    pub unit_id: String,
    pub attempt: u32,
    pub worker_id: String,
    /// Opaque instruction from the bundle.
    pub command: Option<String>,
    /// Fires when the worker running this attempt is torn down.
    pub cancel: oneshot::Receiver<()>,
}

/// What an attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Fingerprint of the attempt's output, for oscillation detection.
    pub content_hash: Option<String>,
    pub error: Option<String>,
    pub canceled: bool,
}

impl ExecutionOutcome {
    pub fn succeeded(exit_code: i32, content_hash: Option<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(exit_code),
            content_hash,
            ..Self::default()
        }
    }

    pub fn failed(exit_code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn canceled() -> Self {
        Self {
            canceled: true,
            ..Self::default()
        }
    }

    pub fn with_content_hash(mut self, content_hash: Option<String>) -> Self {
        self.content_hash = content_hash;
        self
    }
}

/// Trait abstracting how a unit attempt is executed.
///
/// An adapter is shared by every worker of its type, so `execute` takes
/// `&self` and may be called concurrently.
pub trait ExecutionAdapter: Send + Sync {
    /// Key this adapter is registered under.
    fn adapter_type(&self) -> &str;

    /// Whether the adapter can run anything on this host.
    fn check_available(&self) -> bool;

    /// Run one attempt to completion or cancellation.
    ///
    /// A failed attempt is an `Ok` outcome with `success == false`; `Err` is
    /// reserved for the adapter itself breaking.
    fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + '_>>;
}
