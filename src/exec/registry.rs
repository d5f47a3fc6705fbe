// src/exec/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{Result, WorkstreamError};
use crate::exec::adapter::ExecutionAdapter;
use crate::exec::process::ProcessAdapter;

/// Adapters keyed by adapter type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ExecutionAdapter>>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `process` adapter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ProcessAdapter::new()));
        registry
    }

    /// Register `adapter`, replacing any adapter of the same type.
    pub fn register(&mut self, adapter: Arc<dyn ExecutionAdapter>) {
        let key = adapter.adapter_type().to_string();
        debug!(adapter = %key, "registered execution adapter");
        self.adapters.insert(key, adapter);
    }

    pub fn get(&self, adapter_type: &str) -> Result<Arc<dyn ExecutionAdapter>> {
        self.adapters
            .get(adapter_type)
            .cloned()
            .ok_or_else(|| WorkstreamError::AdapterNotFound(adapter_type.to_string()))
    }

    pub fn contains(&self, adapter_type: &str) -> bool {
        self.adapters.contains_key(adapter_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// Fail fast unless every requested type is registered and available.
    pub fn ensure_available<'a>(&self, types: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for adapter_type in types {
            let adapter = self.get(adapter_type)?;
            if !adapter.check_available() {
                return Err(WorkstreamError::AdapterUnavailable(adapter_type.to_string()));
            }
        }
        info!(adapters = ?self.adapters.keys().collect::<Vec<_>>(), "execution adapters ready");
        Ok(())
    }
}
