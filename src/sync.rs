// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-recovering lock helpers.
//!
//! The task registry and codec registry are shared between the worker loop
//! and every spawned pipeline. A panic inside one pipeline must not take the
//! registries down with it, so lock poisoning is logged and the guard is
//! recovered instead of propagating the panic.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(
                target: "glbpipe::sync",
                "RwLock poisoned during read; a pipeline panicked while holding it. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(
                target: "glbpipe::sync",
                "RwLock poisoned during write; a pipeline panicked while holding it. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a mutex, recovering from poisoning if necessary.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(
                target: "glbpipe::sync",
                "Mutex poisoned; a pipeline panicked while holding it. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_write_then_read() {
        let lock = RwLock::new(1);
        *resilient_write(&lock) = 2;
        assert_eq!(*resilient_read(&lock), 2);
    }

    #[test]
    fn test_resilient_read_poisoned() {
        let lock = Arc::new(RwLock::new(7));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        assert_eq!(*resilient_read(&lock), 7);
    }

    #[test]
    fn test_resilient_lock_poisoned() {
        let lock = Arc::new(Mutex::new(vec![1]));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let _guard = lock_clone.lock().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        resilient_lock(&lock).push(2);
        assert_eq!(*resilient_lock(&lock), vec![1, 2]);
    }
}
