//! Small helpers that did not fit anywhere else
// (c) 2025 the llrpd contributors

pub(crate) mod hex;

mod tracing;
pub(crate) use tracing::{
    is_initialised as tracing_is_initialised, setup as setup_tracing, trace_level,
};

#[cfg(test)]
pub(crate) mod test_reader;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks a mutex, shrugging off poisoning: the data these locks guard
/// stays consistent across a panicking holder.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared-read counterpart of [`lock`].
pub(crate) fn read_lock<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive counterpart of [`lock`].
pub(crate) fn write_lock<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
