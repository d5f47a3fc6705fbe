use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workstream::errors::Result;
use workstream::exec::{ExecutionAdapter, ExecutionOutcome, ExecutionRequest};

pub const FAKE_ADAPTER: &str = "fake";

/// One call the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub run_id: String,
    pub unit_id: String,
    pub attempt: u32,
    pub worker_id: String,
}

/// A fake execution adapter that:
/// - records every attempt it is asked to run
/// - replays scripted outcomes per unit (then falls back to a per-unit
///   default, then to success)
/// - can hold a unit until its worker is torn down
/// - tracks the highest number of attempts in flight at once
#[derive(Clone)]
pub struct FakeAdapter {
    adapter_type: String,
    available: bool,
    delay: Option<Duration>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<ExecutionOutcome>>>>,
    fallbacks: Arc<Mutex<HashMap<String, ExecutionOutcome>>>,
    hang: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<FakeCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::named(FAKE_ADAPTER)
    }

    pub fn named(adapter_type: &str) -> Self {
        Self {
            adapter_type: adapter_type.to_string(),
            available: true,
            delay: None,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            fallbacks: Arc::new(Mutex::new(HashMap::new())),
            hang: Arc::new(Mutex::new(BTreeSet::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report the adapter as unavailable on this host.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Sleep this long in every attempt, so concurrent attempts overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Outcomes for successive attempts at `unit_id`.
    pub fn script(&self, unit_id: &str, outcomes: Vec<ExecutionOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), outcomes.into());
    }

    /// Outcome for every attempt at `unit_id` once its script is used up.
    pub fn always(&self, unit_id: &str, outcome: ExecutionOutcome) {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(unit_id.to_string(), outcome);
    }

    /// Keep attempts at `unit_id` running until the worker is torn down.
    pub fn hang_until_canceled(&self, unit_id: &str) {
        self.hang.lock().unwrap().insert(unit_id.to_string());
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Unit ids in the order their attempts started.
    pub fn executed_units(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.unit_id).collect()
    }

    pub fn attempts_for(&self, unit_id: &str) -> usize {
        self.calls().iter().filter(|c| c.unit_id == unit_id).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, unit_id: &str) -> ExecutionOutcome {
        if let Some(outcome) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(unit_id)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        self.fallbacks
            .lock()
            .unwrap()
            .get(unit_id)
            .cloned()
            .unwrap_or_else(|| ExecutionOutcome::succeeded(0, None))
    }
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionAdapter for FakeAdapter {
    fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    fn check_available(&self) -> bool {
        self.available
    }

    fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(FakeCall {
                run_id: request.run_id.clone(),
                unit_id: request.unit_id.clone(),
                attempt: request.attempt,
                worker_id: request.worker_id.clone(),
            });

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let hang = self.hang.lock().unwrap().contains(&request.unit_id);
            let outcome = if hang {
                match request.cancel.await {
                    Ok(()) => ExecutionOutcome::canceled(),
                    Err(_) => ExecutionOutcome::failed(None, "teardown handle dropped"),
                }
            } else {
                self.next_outcome(&request.unit_id)
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(outcome)
        })
    }
}
