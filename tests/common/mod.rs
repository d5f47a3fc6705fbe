#![allow(dead_code)]

use std::sync::Arc;

pub use workstream_test_utils::{
    init_tracing, wait_until, with_timeout, BundleBuilder, ConfigFileBuilder, FakeAdapter, FAKE_ADAPTER,
};

use workstream::breaker::{BreakerConfig, CircuitBreaker};
use workstream::exec::AdapterRegistry;
use workstream::ledger::Ledger;
use workstream::pool::{MemoryWorkerStore, PoolConfig, WorkerPool};
use workstream::Orchestrator;

pub fn bundle(id: &str) -> BundleBuilder {
    BundleBuilder::new(id)
}

/// Pool config whose default adapter is the fake one.
pub fn fake_pool_config(max_workers: usize) -> PoolConfig {
    PoolConfig {
        max_workers,
        default_adapter: FAKE_ADAPTER.to_string(),
        ..PoolConfig::default()
    }
}

pub fn memory_pool(max_workers: usize) -> WorkerPool {
    WorkerPool::new(&fake_pool_config(max_workers), Box::new(MemoryWorkerStore::new()))
}

pub fn fake_registry(adapter: &FakeAdapter) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(adapter.clone()));
    registry
}

/// Orchestrator over in-memory stores that runs everything on `adapter`.
pub fn fake_orchestrator(adapter: &FakeAdapter, max_workers: usize) -> Orchestrator {
    fake_orchestrator_with(adapter, max_workers, &BreakerConfig::default())
}

pub fn fake_orchestrator_with(
    adapter: &FakeAdapter,
    max_workers: usize,
    breaker: &BreakerConfig,
) -> Orchestrator {
    Orchestrator::new(
        memory_pool(max_workers),
        Arc::new(Ledger::in_memory()),
        fake_registry(adapter),
        CircuitBreaker::new(breaker),
    )
}
