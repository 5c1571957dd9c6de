//! ## Shared Utilities
//!
//! Small building blocks used across the pool core:
//! - [`Mutex`], a closure-based wrapper over [`std::sync::Mutex`].
//! - [`ShutdownMessage`], broadcast to every long-running task on shutdown.
//! - [`TimeSource`], the clock consulted by timestamp checks and vardiff.
use std::{
    sync::{Mutex as Mutex_, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

/// Shared mutable state guarded by a closure-scoped lock.
///
/// The guard never escapes the closure passed to [`Mutex::safe_lock`] or
/// [`Mutex::super_safe_lock`], so a lock can't be held across an `.await` by accident.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized>(Mutex_<T>);

impl<T> Mutex<T> {
    pub fn new(v: T) -> Self {
        Mutex(Mutex_::new(v))
    }

    /// Locks and runs `thunk` on the inner value, surfacing a poisoned lock to the caller.
    ///
    /// Never unwrap inside the closure: return the result and handle it outside the lock.
    pub fn safe_lock<F, Ret>(&self, thunk: F) -> Result<Ret, PoisonError<MutexGuard<'_, T>>>
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock()?;
        let return_value = thunk(&mut *lock);
        drop(lock);
        Ok(return_value)
    }

    /// Locks and runs `thunk`, recovering the inner value if a previous holder panicked.
    ///
    /// Only used for state whose invariants hold between individual field writes
    /// (counters, maps keyed by id), where the data behind a poisoned lock is still usable.
    pub fn super_safe_lock<F, Ret>(&self, thunk: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        thunk(&mut *lock)
    }
}

/// Messages broadcast to long-running tasks to coordinate shutdown.
#[derive(Debug, Clone)]
pub enum ShutdownMessage {
    /// Stop every task.
    ShutdownAll,
}

/// Source of the current unix time in seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Parses a big-endian hex string of exactly `N` bytes.
pub fn decode_hex_array<const N: usize>(hex_str: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(hex_str, &mut out).ok()?;
    Some(out)
}
