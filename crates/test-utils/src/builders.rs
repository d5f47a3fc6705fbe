#![allow(dead_code)]

use std::path::Path;

use workstream::config::{ConfigFile, RawConfigFile};
use workstream::dag::WorkstreamBundle;
use workstream::errors::Result;
use workstream::types::StorageMode;

/// Builder for `WorkstreamBundle`.
pub struct BundleBuilder {
    bundle: WorkstreamBundle,
}

impl BundleBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            bundle: WorkstreamBundle::new(id),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.bundle.depends_on.insert(dep.to_string());
        self
    }

    pub fn files(mut self, paths: &[&str]) -> Self {
        self.bundle
            .files_scope
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn creates(mut self, paths: &[&str]) -> Self {
        self.bundle
            .files_create
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.bundle.conflict_group = Some(group.to_string());
        self
    }

    pub fn solo(mut self) -> Self {
        self.bundle.parallel_ok = false;
        self
    }

    pub fn adapter(mut self, adapter_type: &str) -> Self {
        self.bundle.adapter_type = Some(adapter_type.to_string());
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.bundle.command = Some(command.to_string());
        self
    }

    pub fn build(self) -> WorkstreamBundle {
        self.bundle
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.pool.max_workers = n;
        self
    }

    pub fn default_adapter(mut self, adapter_type: &str) -> Self {
        self.config.pool.default_adapter = adapter_type.to_string();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.breaker.max_attempts = n;
        self
    }

    pub fn max_error_repeats(mut self, n: usize) -> Self {
        self.config.breaker.max_error_repeats = n;
        self
    }

    pub fn oscillation_threshold(mut self, n: usize) -> Self {
        self.config.breaker.oscillation_threshold = n;
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.queue.lock_timeout_ms = ms;
        self
    }

    pub fn state_dir(mut self, dir: &Path) -> Self {
        self.config.state.dir = dir.to_path_buf();
        self
    }

    pub fn storage(mut self, mode: StorageMode) -> Self {
        self.config.state.storage = mode;
        self
    }

    /// In-memory storage; nothing touches the filesystem.
    pub fn in_memory(self) -> Self {
        self.storage(StorageMode::Memory)
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
