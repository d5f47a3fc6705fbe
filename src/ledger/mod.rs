// src/ledger/mod.rs

//! Run/step ledger with an append-only event log.

pub mod model;
pub mod recorder;
pub mod state;
pub mod store;

pub use model::{EventType, LedgerEvent, Run, RunId, StepAttempt, StepCompletion, StepId};
pub use recorder::Ledger;
pub use state::{RunState, StepState};
pub use store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
