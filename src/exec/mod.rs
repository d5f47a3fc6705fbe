// src/exec/mod.rs

//! Execution layer.
//!
//! - [`adapter`] defines the `ExecutionAdapter` trait the orchestrator calls.
//! - [`registry`] maps adapter-type strings to adapters, resolved up front.
//! - [`process`] is the built-in adapter that runs shell commands with
//!   `tokio::process`.

pub mod adapter;
pub mod process;
pub mod registry;

pub use adapter::{ExecutionAdapter, ExecutionOutcome, ExecutionRequest};
pub use process::{PROCESS_ADAPTER, ProcessAdapter};
pub use registry::AdapterRegistry;
