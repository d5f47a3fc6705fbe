// src/dag/scheduler.rs

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::dag::bundle::{BundleId, WorkstreamBundle};
use crate::dag::graph::BundleGraph;
use crate::dag::plan::{ConflictReason, ConflictRecord, ExecutionPlan, ExecutionWave};
use crate::errors::{Result, WorkstreamError};

/// Converts a bundle list into ordered execution waves.
///
/// The scheduler is synchronous and holds no per-run state; a plan is a
/// pure function of the bundle list and the worker cap.
#[derive(Debug, Clone)]
pub struct WaveScheduler {
    max_workers: usize,
}

/// Wave under construction.
struct OpenWave<'a> {
    members: Vec<&'a WorkstreamBundle>,
    claimed: BTreeSet<String>,
}

impl<'a> OpenWave<'a> {
    fn with(bundle: &'a WorkstreamBundle) -> Self {
        Self {
            claimed: bundle.claimed_files(),
            members: vec![bundle],
        }
    }

    fn push(&mut self, bundle: &'a WorkstreamBundle) {
        self.claimed.extend(bundle.claimed_files());
        self.members.push(bundle);
    }

    fn last_id(&self) -> &str {
        self.members.last().map(|b| b.id.as_str()).unwrap_or_default()
    }

    /// Why `bundle` may not join this wave, if anything stops it.
    ///
    /// Returns the id of the member that blocks it alongside the reason.
    fn rejects(&self, bundle: &WorkstreamBundle, cap: usize) -> Option<(BundleId, ConflictReason)> {
        if let Some(group) = bundle.group() {
            if let Some(holder) = self.members.iter().find(|m| m.group() == Some(group)) {
                return Some((
                    holder.id.clone(),
                    ConflictReason::ConflictGroup {
                        group: group.to_string(),
                    },
                ));
            }
        }

        let claimed = bundle.claimed_files();
        if !claimed.is_disjoint(&self.claimed) {
            for member in &self.members {
                let overlap: Vec<String> = member
                    .claimed_files()
                    .intersection(&claimed)
                    .cloned()
                    .collect();
                if !overlap.is_empty() {
                    return Some((
                        member.id.clone(),
                        ConflictReason::FileOverlap { paths: overlap },
                    ));
                }
            }
        }

        if self.members.len() >= cap {
            return Some((self.last_id().to_string(), ConflictReason::WaveFull { cap }));
        }

        None
    }

    fn into_wave(self, index: usize) -> ExecutionWave {
        ExecutionWave {
            index,
            bundle_ids: self.members.iter().map(|b| b.id.clone()).collect(),
        }
    }
}

impl WaveScheduler {
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(WorkstreamError::Config(
                "wave scheduler needs a worker cap >= 1 (got 0)".to_string(),
            ));
        }
        Ok(Self { max_workers })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Validate `bundles` and build an [`ExecutionPlan`].
    ///
    /// Fails with a definitional error (duplicate id, missing dependency,
    /// cycle) before any wave is produced.
    pub fn plan(&self, bundles: &[WorkstreamBundle]) -> Result<ExecutionPlan> {
        let graph = BundleGraph::build(bundles)?;
        let levels = graph.levels()?;

        let mut waves: Vec<ExecutionWave> = Vec::new();
        let mut conflicts: Vec<ConflictRecord> = Vec::new();

        for level in &levels {
            let mut open: Option<OpenWave<'_>> = None;

            for &idx in level {
                let bundle = &bundles[idx];

                if !bundle.parallel_ok {
                    if let Some(wave) = open.take() {
                        conflicts.push(ConflictRecord {
                            blocking_id: wave.last_id().to_string(),
                            blocked_id: bundle.id.clone(),
                            reason: ConflictReason::SoloRequired,
                        });
                        waves.push(wave.into_wave(waves.len()));
                    }
                    debug!(bundle = %bundle.id, "parallel_ok = false; placing in solo wave");
                    waves.push(OpenWave::with(bundle).into_wave(waves.len()));
                    continue;
                }

                open = match open.take() {
                    None => Some(OpenWave::with(bundle)),
                    Some(mut wave) => match wave.rejects(bundle, self.max_workers) {
                        None => {
                            wave.push(bundle);
                            Some(wave)
                        }
                        Some((blocking_id, reason)) => {
                            debug!(
                                bundle = %bundle.id,
                                blocking = %blocking_id,
                                %reason,
                                "bundle rejected from current wave; opening a new one"
                            );
                            conflicts.push(ConflictRecord {
                                blocking_id,
                                blocked_id: bundle.id.clone(),
                                reason,
                            });
                            waves.push(wave.into_wave(waves.len()));
                            Some(OpenWave::with(bundle))
                        }
                    },
                };
            }

            if let Some(wave) = open.take() {
                waves.push(wave.into_wave(waves.len()));
            }
        }

        let critical_path = critical_path(&graph, &levels);
        let plan = ExecutionPlan::new(waves, critical_path, conflicts, bundles);

        info!(
            bundles = plan.bundle_count(),
            waves = plan.waves.len(),
            levels = levels.len(),
            conflicts = plan.conflicts.len(),
            speedup = plan.speedup_estimate,
            "execution plan built"
        );

        Ok(plan)
    }
}

/// Longest dependency chain under unit cost, root first.
///
/// Ties prefer the bundle that appears first in the input.
fn critical_path(graph: &BundleGraph, levels: &[Vec<usize>]) -> Vec<BundleId> {
    if graph.is_empty() {
        return Vec::new();
    }

    let mut depth = vec![0usize; graph.len()];
    let mut pred: Vec<Option<usize>> = vec![None; graph.len()];

    for level in levels {
        for &i in level {
            let mut best: Option<usize> = None;
            for &dep in graph.dependencies_of(i) {
                if best.is_none_or(|b| depth[dep] > depth[b]) {
                    best = Some(dep);
                }
            }
            depth[i] = best.map_or(1, |b| depth[b] + 1);
            pred[i] = best;
        }
    }

    let mut end = 0;
    for i in 1..graph.len() {
        if depth[i] > depth[end] {
            end = i;
        }
    }

    let mut path = vec![graph.id(end).to_string()];
    let mut cursor = pred[end];
    while let Some(i) = cursor {
        path.push(graph.id(i).to_string());
        cursor = pred[i];
    }
    path.reverse();
    path
}
