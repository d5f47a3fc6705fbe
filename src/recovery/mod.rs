// src/recovery/mod.rs

//! Crash recovery and run resumption.
//!
//! After a restart the persisted pool may still list workers as BUSY even
//! though nothing is running them. [`RecoveryManager::recover_from_crash`]
//! turns that ambiguity into definite failures; resumption then replans
//! whatever did not succeed.

pub mod manager;

pub use manager::{RecoveryManager, RecoveryReport, ORPHANED_SIGNATURE, RESUMED_SIGNATURE};
