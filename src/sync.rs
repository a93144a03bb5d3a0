//! Counting semaphore with P/V semantics.
//!
//! The cache's readers-preference discipline needs a primitive that one
//! thread can acquire and a *different* thread can release (the first reader
//! acquires the write gate, the last reader releases it). A lock guard is
//! tied to the thread that took it, so the gate is a semaphore instead.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore built from a `parking_lot` mutex and condvar.
///
/// `acquire` blocks until a permit is available; `release` returns a permit
/// and wakes one waiter. Permits are not owned by a thread: any thread may
/// call `release`, which is what the readers-writers protocol relies on.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Takes one permit, blocking while none are available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Returns one permit and wakes a single waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Takes one permit if immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }
}
