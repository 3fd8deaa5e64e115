//! util: shared helpers.
//!
//! Contains:
//! - now_millis(): current Unix time in milliseconds (u64, saturating).
//! - lock(): Mutex::lock that survives poisoning.
//! - read()/write(): то же для RwLock.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Current Unix time in milliseconds.
#[inline]
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().min(u64::MAX as u128) as u64
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
/// Every structure guarded this way stays consistent between statements,
/// so a poisoned lock carries no torn state.
#[inline]
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[inline]
pub fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|p| p.into_inner())
}

#[inline]
pub fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|p| p.into_inner())
}
