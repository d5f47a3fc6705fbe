// src/dag/bundle.rs

//! The schedulable unit of work.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Canonical bundle identifier type used throughout the engine.
pub type BundleId = String;

/// An immutable, schedulable unit of work.
///
/// The scheduler only looks at `depends_on`, the claimed files,
/// `conflict_group` and `parallel_ok`. `adapter_type` and `command` are
/// passed through untouched to whichever execution adapter runs the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstreamBundle {
    pub id: BundleId,

    /// Bundles that must succeed before this one may run.
    #[serde(default)]
    pub depends_on: BTreeSet<BundleId>,

    /// Existing files this bundle will modify.
    #[serde(default)]
    pub files_scope: Vec<String>,

    /// Files this bundle will create.
    #[serde(default)]
    pub files_create: Vec<String>,

    /// Bundles sharing a group never run in the same wave, regardless of
    /// file overlap.
    #[serde(default)]
    pub conflict_group: Option<String>,

    /// `false` forces the bundle into a wave of its own.
    #[serde(default = "default_parallel_ok")]
    pub parallel_ok: bool,

    /// Registered adapter that executes this bundle. Falls back to
    /// `[pool].default_adapter`.
    #[serde(default)]
    pub adapter_type: Option<String>,

    /// Opaque instruction for the adapter.
    #[serde(default)]
    pub command: Option<String>,
}

fn default_parallel_ok() -> bool {
    true
}

impl WorkstreamBundle {
    pub fn new(id: impl Into<BundleId>) -> Self {
        Self {
            id: id.into(),
            depends_on: BTreeSet::new(),
            files_scope: Vec::new(),
            files_create: Vec::new(),
            conflict_group: None,
            parallel_ok: true,
            adapter_type: None,
            command: None,
        }
    }

    /// Every path this bundle claims exclusively (`files_scope` plus
    /// `files_create`), normalized so `./src/a.rs` and `src/a.rs` collide.
    pub fn claimed_files(&self) -> BTreeSet<String> {
        self.files_scope
            .iter()
            .chain(self.files_create.iter())
            .map(|p| normalize_path(p))
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Conflict group, treating an empty label as no group.
    pub fn group(&self) -> Option<&str> {
        self.conflict_group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    /// Adapter type, falling back to `default`.
    pub fn adapter_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.adapter_type.as_deref().unwrap_or(default)
    }
}

fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p.trim_end_matches('/').to_string()
}
