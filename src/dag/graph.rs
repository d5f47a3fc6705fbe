// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::bundle::{BundleId, WorkstreamBundle};
use crate::errors::{Result, WorkstreamError};

/// Internal node structure: stores immediate deps and dependents by index.
#[derive(Debug, Clone, Default)]
struct BundleNode {
    deps: Vec<usize>,
    dependents: Vec<usize>,
}

/// Validated dependency graph over a bundle list.
///
/// Nodes are addressed by their position in the input list so every
/// traversal can preserve input order. Construction fails on empty or
/// duplicate ids and on dependencies naming unknown bundles; cycles are
/// detected by [`BundleGraph::levels`].
#[derive(Debug, Clone)]
pub struct BundleGraph {
    ids: Vec<BundleId>,
    index: HashMap<BundleId, usize>,
    nodes: Vec<BundleNode>,
}

impl BundleGraph {
    pub fn build(bundles: &[WorkstreamBundle]) -> Result<Self> {
        let mut index = HashMap::with_capacity(bundles.len());

        for (i, bundle) in bundles.iter().enumerate() {
            if bundle.id.trim().is_empty() {
                return Err(WorkstreamError::InvalidBundle(format!(
                    "bundle at position {i} has an empty id"
                )));
            }
            if index.insert(bundle.id.clone(), i).is_some() {
                return Err(WorkstreamError::DuplicateBundle(bundle.id.clone()));
            }
        }

        let mut nodes = vec![BundleNode::default(); bundles.len()];

        for (i, bundle) in bundles.iter().enumerate() {
            for dep in bundle.depends_on.iter() {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(WorkstreamError::MissingDependency {
                        bundle: bundle.id.clone(),
                        missing: dep.clone(),
                    });
                };
                nodes[i].deps.push(dep_idx);
                nodes[dep_idx].dependents.push(i);
            }
        }

        for node in nodes.iter_mut() {
            node.deps.sort_unstable();
            node.dependents.sort_unstable();
        }

        Ok(Self {
            ids: bundles.iter().map(|b| b.id.clone()).collect(),
            index,
            nodes,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Immediate dependencies of a bundle, by index, ascending.
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].deps
    }

    /// Immediate dependents of a bundle, by index, ascending.
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].dependents
    }

    /// Topological leveling.
    ///
    /// Level 0 holds every bundle without dependencies; level k holds the
    /// bundles whose dependencies all sit in levels < k. Each level keeps
    /// input order. If bundles remain but none can be extracted, the
    /// remaining subgraph contains a cycle and `WorkstreamError::Cycle` names
    /// the bundles on it.
    pub fn levels(&self) -> Result<Vec<Vec<usize>>> {
        let mut remaining_deps: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut scheduled = vec![false; self.len()];
        let mut scheduled_count = 0;
        let mut levels = Vec::new();

        while scheduled_count < self.len() {
            let level: Vec<usize> = (0..self.len())
                .filter(|&i| !scheduled[i] && remaining_deps[i] == 0)
                .collect();

            if level.is_empty() {
                let stuck: Vec<usize> = (0..self.len()).filter(|&i| !scheduled[i]).collect();
                return Err(WorkstreamError::Cycle(self.cycle_members(&stuck)));
            }

            for &i in &level {
                scheduled[i] = true;
                for &succ in &self.nodes[i].dependents {
                    remaining_deps[succ] -= 1;
                }
            }
            scheduled_count += level.len();

            debug!(level = levels.len(), size = level.len(), "extracted topological level");
            levels.push(level);
        }

        Ok(levels)
    }

    /// Ids of the bundles that lie on a cycle within `candidates`, sorted.
    ///
    /// Bundles that are merely downstream of a cycle are not reported.
    fn cycle_members(&self, candidates: &[usize]) -> Vec<BundleId> {
        let members: HashSet<usize> = candidates.iter().copied().collect();
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for &i in candidates {
            graph.add_node(i);
        }
        for &i in candidates {
            for &dep in &self.nodes[i].deps {
                if members.contains(&dep) {
                    graph.add_edge(dep, i, ());
                }
            }
        }

        let mut ids: Vec<BundleId> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|i| self.ids[i].clone())
            .collect();

        if ids.is_empty() {
            ids = candidates.iter().map(|&i| self.ids[i].clone()).collect();
        }
        ids.sort();
        ids
    }
}
