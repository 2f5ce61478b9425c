//! Lock utilities
//!
//! Provides helpers for common lock patterns with automatic release.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Lock a std mutex, recovering the data if a previous holder panicked
///
/// Callbacks into module code never run while these locks are held, so a
/// poisoned lock only means a panic inside the host's own bookkeeping; the
/// data is still structurally valid.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned mutex");
        poisoned.into_inner()
    })
}

/// Read-lock a std RwLock, recovering from poisoning
pub fn read_unpoisoned<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned rwlock (read)");
        poisoned.into_inner()
    })
}

/// Write-lock a std RwLock, recovering from poisoning
pub fn write_unpoisoned<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned rwlock (write)");
        poisoned.into_inner()
    })
}

/// Execute a closure with a tokio Mutex lock, automatically releasing it
///
/// # Example
/// ```rust,ignore
/// let count = with_lock(&instances, |guard| guard.len()).await;
/// ```
pub async fn with_lock<T, F, R>(mutex: &tokio::sync::Mutex<T>, f: F) -> R
where
    F: FnOnce(&mut T) -> R,
{
    let mut guard = mutex.lock().await;
    f(&mut guard)
}
