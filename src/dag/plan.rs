// src/dag/plan.rs

//! Plain-data output of the wave scheduler.

use std::collections::HashMap;
use std::fmt;

use crate::dag::bundle::{BundleId, WorkstreamBundle};

/// A set of bundles permitted to run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionWave {
    pub index: usize,
    pub bundle_ids: Vec<BundleId>,
}

impl ExecutionWave {
    pub fn len(&self) -> usize {
        self.bundle_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bundle_ids.iter().any(|b| b == id)
    }
}

/// Why a bundle could not join the wave that was open when it was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Claimed files intersect with a member of the wave.
    FileOverlap { paths: Vec<String> },
    /// A member of the wave already holds the same conflict group.
    ConflictGroup { group: String },
    /// The wave already holds `cap` bundles.
    WaveFull { cap: usize },
    /// The bundle has `parallel_ok = false`.
    SoloRequired,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::FileOverlap { paths } => {
                write!(f, "file overlap: {}", paths.join(", "))
            }
            ConflictReason::ConflictGroup { group } => write!(f, "conflict group '{group}'"),
            ConflictReason::WaveFull { cap } => write!(f, "wave full ({cap} workers)"),
            ConflictReason::SoloRequired => f.write_str("parallel_ok = false"),
        }
    }
}

/// A rejected placement: `blocked_id` could not share a wave with
/// `blocking_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub blocking_id: BundleId,
    pub blocked_id: BundleId,
    pub reason: ConflictReason,
}

/// Ordered waves plus diagnostics.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub waves: Vec<ExecutionWave>,
    /// Longest dependency chain, root first.
    pub critical_path: Vec<BundleId>,
    /// Bundle count divided by wave count. Assumes every bundle costs the
    /// same, so it is an upper bound on the parallel gain.
    pub speedup_estimate: f64,
    pub conflicts: Vec<ConflictRecord>,
    bundles: HashMap<BundleId, WorkstreamBundle>,
    wave_index: HashMap<BundleId, usize>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        waves: Vec<ExecutionWave>,
        critical_path: Vec<BundleId>,
        conflicts: Vec<ConflictRecord>,
        bundles: &[WorkstreamBundle],
    ) -> Self {
        let speedup_estimate = if waves.is_empty() {
            1.0
        } else {
            bundles.len() as f64 / waves.len() as f64
        };

        let wave_index = waves
            .iter()
            .flat_map(|w| w.bundle_ids.iter().map(move |id| (id.clone(), w.index)))
            .collect();

        Self {
            waves,
            critical_path,
            speedup_estimate,
            conflicts,
            bundles: bundles.iter().map(|b| (b.id.clone(), b.clone())).collect(),
            wave_index,
        }
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn bundle(&self, id: &str) -> Option<&WorkstreamBundle> {
        self.bundles.get(id)
    }

    pub fn bundles(&self) -> impl Iterator<Item = &WorkstreamBundle> {
        self.bundles.values()
    }

    /// Index of the wave containing `id`.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.wave_index.get(id).copied()
    }

    /// Largest wave size in the plan.
    pub fn max_parallelism(&self) -> usize {
        self.waves.iter().map(ExecutionWave::len).max().unwrap_or(0)
    }
}
