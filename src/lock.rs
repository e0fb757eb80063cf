//! Global execution lock shared by all plugin contexts.
//!
//! In [`LockMode::Exclusive`] at most one thread executes plugin code at a
//! time. The holder gives the lock up only at yield points (see
//! [`ExecutionLock::yield_while`]) or when its call completes. A plugin that
//! computes without ever yielding therefore starves every other plugin; the
//! lock guarantees mutual exclusion, not liveness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// How plugin execution is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LockMode {
    /// One plugin body runs at a time.
    #[default]
    Exclusive,
    /// Plugin bodies run fully in parallel; the lock is a no-op.
    Parallel,
}

/// Lock usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions, including re-acquisitions after a yield.
    pub acquisitions: u64,
    /// Acquisitions that had to wait for another holder.
    pub contended: u64,
    /// Acquisitions that gave up after the configured timeout.
    pub timeouts: u64,
}

/// Mutual-exclusion resource guarding interpreter execution.
#[derive(Debug)]
pub struct ExecutionLock {
    mode: LockMode,
    timeout: Option<Duration>,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    acquisitions: AtomicU64,
    contended: AtomicU64,
    timeouts: AtomicU64,
}

impl ExecutionLock {
    /// Create a lock with the given mode and no acquisition timeout.
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            timeout: None,
            owner: Mutex::new(None),
            released: Condvar::new(),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Bound the time spent waiting for the lock.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the lock mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Get the acquisition timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Acquire the lock for the duration of the returned permit.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock. Re-entry would
    /// deadlock and indicates a defect in the caller's locking logic.
    pub fn acquire(&self) -> Result<ExecutionPermit<'_>> {
        if self.mode == LockMode::Exclusive {
            self.lock_raw()?;
        }
        Ok(ExecutionPermit { lock: self })
    }

    /// Check if the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Check if any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Run `f` with the lock released, then take it back.
    ///
    /// This is how a yield point gives other plugins a turn. Threads that do not
    /// hold the lock, and locks in parallel mode, simply run `f`.
    pub fn yield_while<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if self.mode == LockMode::Parallel || !self.is_held_by_current_thread() {
            return Ok(f());
        }

        self.unlock_raw();
        let result = f();
        self.lock_raw()?;
        Ok(result)
    }

    /// Get usage counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    fn lock_raw(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();

        if *owner == Some(me) {
            panic!("execution lock re-entered by its holder {:?}", me);
        }

        if owner.is_some() {
            self.contended.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("waiting for execution lock held by {:?}", *owner);

            // a timeout too large to express as a deadline waits without one
            match self.timeout.and_then(|t| Some((t, Instant::now().checked_add(t)?))) {
                Some((timeout, deadline)) => {
                    while owner.is_some() {
                        if self.released.wait_until(&mut owner, deadline).timed_out()
                            && owner.is_some()
                        {
                            self.timeouts.fetch_add(1, Ordering::Relaxed);
                            return Err(Error::LockTimeout(timeout));
                        }
                    }
                }
                None => {
                    while owner.is_some() {
                        self.released.wait(&mut owner);
                    }
                }
            }
        }

        *owner = Some(me);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unlock_raw(&self) {
        let mut owner = self.owner.lock();
        if *owner == Some(thread::current().id()) {
            *owner = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

impl Default for ExecutionLock {
    fn default() -> Self {
        Self::new(LockMode::default())
    }
}

/// Proof of holding the execution lock; releases it on drop.
#[derive(Debug)]
pub struct ExecutionPermit<'a> {
    lock: &'a ExecutionLock,
}

impl Drop for ExecutionPermit<'_> {
    fn drop(&mut self) {
        if self.lock.mode == LockMode::Exclusive {
            // no-op if a failed re-acquire after a yield left us without it
            self.lock.unlock_raw();
        }
    }
}

/// Cooperative cancellation flag with a cancellable timed wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: std::sync::Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any waiter.
    pub fn cancel(&self) {
        let (flag, changed) = &*self.inner;
        *flag.lock() = true;
        changed.notify_all();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Wait up to `timeout`; returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, changed) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = flag.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if changed.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => changed.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_exclusive_mutual_exclusion() {
        let lock = Arc::new(ExecutionLock::new(LockMode::Exclusive));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _permit = lock.acquire().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.stats().acquisitions, 200);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_parallel_is_noop() {
        let lock = ExecutionLock::new(LockMode::Parallel);
        let _a = lock.acquire().unwrap();
        let _b = lock.acquire().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_yield_releases_lock() {
        let lock = Arc::new(ExecutionLock::new(LockMode::Exclusive));
        let permit = lock.acquire().unwrap();
        assert!(lock.is_held_by_current_thread());

        let other = lock.clone();
        let acquired_during_yield = lock
            .yield_while(move || {
                thread::spawn(move || other.acquire().map(|_| ()).is_ok())
                    .join()
                    .unwrap()
            })
            .unwrap();

        assert!(acquired_during_yield);
        assert!(lock.is_held_by_current_thread());
        drop(permit);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_timeout() {
        let lock = Arc::new(
            ExecutionLock::new(LockMode::Exclusive).with_timeout(Some(Duration::from_millis(20))),
        );
        let _permit = lock.acquire().unwrap();

        let other = lock.clone();
        let result = thread::spawn(move || other.acquire().map(|_| ()))
            .join()
            .unwrap();

        assert!(matches!(result, Err(Error::LockTimeout(_))));
        assert_eq!(lock.stats().timeouts, 1);
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn test_reentry_is_fatal() {
        let lock = ExecutionLock::new(LockMode::Exclusive);
        let _first = lock.acquire().unwrap();
        let _second = lock.acquire();
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_unbounded_waits_do_not_overflow() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::MAX));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());

        let lock = Arc::new(ExecutionLock::new(LockMode::Exclusive).with_timeout(Some(Duration::MAX)));
        let permit = lock.acquire().unwrap();
        let other = lock.clone();
        let handle = thread::spawn(move || other.acquire().map(|_| ()).is_ok());
        thread::sleep(Duration::from_millis(20));
        drop(permit);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_times_out_without_cancel() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }
}
