// src/sync.rs

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate either completes its write or
/// leaves the protected value untouched, so the inner value is still
/// consistent after a poisoning panic.
pub fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex was poisoned; recovering");
            poisoned.into_inner()
        }
    }
}
