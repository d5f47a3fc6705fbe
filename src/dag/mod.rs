// src/dag/mod.rs

//! Dependency graph and wave scheduling.
//!
//! - [`bundle`] defines the schedulable unit.
//! - [`graph`] validates a bundle list and performs topological leveling.
//! - [`scheduler`] partitions levels into execution waves.
//! - [`plan`] holds the plain-data result.

pub mod bundle;
pub mod graph;
pub mod plan;
pub mod scheduler;

pub use bundle::{BundleId, WorkstreamBundle};
pub use graph::BundleGraph;
pub use plan::{ConflictReason, ConflictRecord, ExecutionPlan, ExecutionWave};
pub use scheduler::WaveScheduler;
