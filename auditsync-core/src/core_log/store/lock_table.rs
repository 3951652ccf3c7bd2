/*
    lock_table.rs - Exclusive per-log locks

    One advisory lock per (target, log). Acquisition waits on a condition
    variable until a bounded deadline and then fails with `Busy`,
    leaving the retry decision to the caller.
*/

use crate::core_log::descriptor::LogKey;
use crate::core_log::store::errors::{StoreError, StoreResult};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Table of currently held log locks
#[derive(Debug)]
pub struct LockTable {
    held: Mutex<HashSet<LogKey>>,
    released: Condvar,
    attempts: u32,
    backoff: Duration,
}

/// Releases its log lock on drop
#[derive(Debug)]
pub struct LogGuard<'a> {
    table: &'a LockTable,
    key: LogKey,
}

impl LockTable {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        LockTable {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Acquire the lock for `key`, or fail with `Busy` once `attempts - 1`
    /// backoff periods have passed without it being free.
    ///
    /// Releases of other logs wake the waiter but do not shorten the wait.
    pub fn acquire(&self, key: &LogKey) -> StoreResult<LogGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + self.backoff * (self.attempts - 1);
        let mut logged = false;

        loop {
            if held.insert(key.clone()) {
                return Ok(LogGuard { table: self, key: key.clone() });
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !logged {
                debug!(log = %key, "log locked, waiting");
                logged = true;
            }
            held = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        metrics::counter!("store.lock.busy").increment(1);
        Err(StoreError::Busy { target_id: key.target_id.clone(), log_id: key.log_id })
    }

    /// Whether `key` is currently locked
    pub fn is_held(&self, key: &LogKey) -> bool {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).contains(key)
    }
}

impl Drop for LogGuard<'_> {
    fn drop(&mut self) {
        self.table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.table.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let table = LockTable::new(3, Duration::from_millis(5));
        let key = LogKey::new("t", 1);

        let guard = table.acquire(&key).unwrap();
        assert!(table.is_held(&key));
        drop(guard);
        assert!(!table.is_held(&key));
        assert!(table.acquire(&key).is_ok());
    }

    #[test]
    fn test_different_logs_are_independent() {
        let table = LockTable::new(1, Duration::from_millis(1));
        let _a = table.acquire(&LogKey::new("t", 1)).unwrap();
        let _b = table.acquire(&LogKey::new("t", 2)).unwrap();
        let _c = table.acquire(&LogKey::new("u", 1)).unwrap();
    }

    #[test]
    fn test_contention_fails_with_busy() {
        let table = LockTable::new(3, Duration::from_millis(5));
        let key = LogKey::new("t", 1);
        let _guard = table.acquire(&key).unwrap();

        let start = Instant::now();
        let err = table.acquire(&key).unwrap_err();
        assert!(matches!(err, StoreError::Busy { log_id: 1, .. }));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let table = Arc::new(LockTable::new(50, Duration::from_millis(20)));
        let key = LogKey::new("t", 1);
        let guard = table.acquire(&key).unwrap();

        let waiter = {
            let table = table.clone();
            let key = key.clone();
            thread::spawn(move || table.acquire(&key).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(30));
        drop(guard);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_other_logs_do_not_shorten_the_wait() {
        let table = Arc::new(LockTable::new(10, Duration::from_millis(50)));
        let key = LogKey::new("t", 1);
        let _guard = table.acquire(&key).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let (table, stop) = (table.clone(), stop.clone());
            thread::spawn(move || {
                let other = LogKey::new("other", 9);
                while !stop.load(Ordering::SeqCst) {
                    drop(table.acquire(&other).unwrap());
                }
            })
        };

        let start = Instant::now();
        let err = table.acquire(&key).unwrap_err();
        let waited = start.elapsed();
        stop.store(true, Ordering::SeqCst);
        churn.join().unwrap();

        assert!(matches!(err, StoreError::Busy { .. }));
        assert!(waited >= Duration::from_millis(450), "gave up after {:?}", waited);
    }
}
