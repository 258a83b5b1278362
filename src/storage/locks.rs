// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process row locks with a bounded wait.
//!
//! A lock is held on one logical key (an activation id, a short id). Keys are
//! independent: holding `a1` never delays a caller locking `a2`.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::database::{StoreError, StoreResult};

pub struct RowLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    timeout: Duration,
}

impl RowLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set is only touched through insert/remove, so a panicking
        // holder cannot leave it half-updated.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self, key: &str) -> StoreResult<RowGuard<'_>> {
        let held = self.held();
        let (mut held, wait) = self
            .released
            .wait_timeout_while(held, self.timeout, |held| held.contains(key))
            .unwrap_or_else(PoisonError::into_inner);

        if wait.timed_out() && held.contains(key) {
            tracing::warn!(key, timeout_ms = self.timeout.as_millis() as u64, "Row lock timed out");
            return Err(StoreError::LockTimeout(key.to_string()));
        }

        held.insert(key.to_string());
        Ok(RowGuard {
            locks: self,
            key: key.to_string(),
        })
    }
}

/// Releases its row when dropped, on every exit path.
pub struct RowGuard<'a> {
    locks: &'a RowLocks,
    key: String,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_acquire_times_out_while_held() {
        let locks = RowLocks::new(Duration::from_millis(50));
        let _guard = locks.acquire("a1").unwrap();
        assert!(matches!(locks.acquire("a1"), Err(StoreError::LockTimeout(k)) if k == "a1"));
    }

    #[test]
    fn different_rows_do_not_contend() {
        let locks = RowLocks::new(Duration::from_millis(50));
        let _a = locks.acquire("a1").unwrap();
        let _b = locks.acquire("a2").unwrap();
    }

    #[test]
    fn released_row_can_be_reacquired() {
        let locks = RowLocks::new(Duration::from_millis(50));
        drop(locks.acquire("a1").unwrap());
        locks.acquire("a1").unwrap();
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let locks = Arc::new(RowLocks::new(Duration::from_secs(5)));
        let guard = locks.acquire("a1").unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire("a1").map(|_| ()).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
