//! Counting semaphore for OS threads
//!
//! Blocks real OS threads, so it is for code around the fiber machinery
//! (bounding worker threads, producer/consumer hand-off), never for
//! fibers waiting on each other inside one thread: a fiber that blocks
//! here blocks every fiber on its thread.

use crate::error::SemaphoreError;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore built on a mutex-protected counter and a condvar
pub struct Semaphore {
    /// Available permits
    count: Mutex<usize>,

    /// Signalled once per `signal()`
    condvar: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `count` permits
    pub const fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    // The count is a plain integer updated in one step, so a panic on
    // another thread cannot leave it half-written.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is available, then take it
    pub fn wait(&self) {
        let guard = self.lock();
        let mut guard = self
            .condvar
            .wait_while(guard, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard -= 1;
    }

    /// Return a permit and wake one waiter
    pub fn signal(&self) {
        let mut guard = self.lock();
        *guard += 1;
        drop(guard);
        self.condvar.notify_one();
    }

    /// Take a permit that is returned when the guard drops
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        self.wait();
        SemaphorePermit { sem: self }
    }

    /// Snapshot of the available permits (stale as soon as it returns)
    pub fn available(&self) -> usize {
        *self.lock()
    }
}

impl TryFrom<i64> for Semaphore {
    type Error = SemaphoreError;

    fn try_from(count: i64) -> Result<Self, Self::Error> {
        usize::try_from(count)
            .map(Semaphore::new)
            .map_err(|_| SemaphoreError::NegativeCount(count))
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available())
            .finish()
    }
}

/// RAII permit from [`Semaphore::acquire`]
#[must_use = "the permit is released as soon as it is dropped"]
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_blocks_until_signal() {
        let sem = Arc::new(Semaphore::new(1));
        let acquired = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));

        let t1 = {
            let sem = Arc::clone(&sem);
            let acquired = Arc::clone(&acquired);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                sem.wait();
                acquired.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                released.store(true, Ordering::SeqCst);
                sem.signal();
            })
        };

        // Let t1 take the only permit
        while !acquired.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));

        let t2 = {
            let sem = Arc::clone(&sem);
            let acquired = Arc::clone(&acquired);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                assert!(acquired.load(Ordering::SeqCst));
                sem.wait();
                // Must not get here before t1 gave its permit back
                assert!(released.load(Ordering::SeqCst));
                sem.signal();
            })
        };

        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn test_bounds_concurrency() {
        const THREADS: usize = 12;
        const PERMITS: usize = 3;

        let sem = Arc::new(Semaphore::new(PERMITS));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    sem.wait();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(now <= PERMITS);
                    thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    sem.signal();
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= PERMITS);
        assert_eq!(sem.available(), PERMITS);
    }

    #[test]
    fn test_permit_guard_signals_on_drop() {
        let sem = Semaphore::new(2);
        {
            let _a = sem.acquire();
            let _b = sem.acquire();
            assert_eq!(sem.available(), 0);
        }
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn test_zero_count_handoff() {
        let sem = Arc::new(Semaphore::new(0));
        let consumer = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(10));
        sem.signal();
        consumer.join().unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn test_negative_count_rejected() {
        let err = Semaphore::try_from(-1i64).unwrap_err();
        assert_eq!(err, SemaphoreError::NegativeCount(-1));
        assert_eq!(Semaphore::try_from(5i64).unwrap().available(), 5);
    }
}
