//! Mutual exclusion and one-shot signalling.
//!
//! Both primitives guard short-lived state only. Callers must not run user
//! callbacks while inside [`CriticalSection::synchronized`].

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Shared state that is only reachable while holding its lock.
#[derive(Debug, Default)]
pub struct CriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> CriticalSection<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `action` with exclusive access. The lock is released when
    /// `action` returns.
    pub fn synchronized<R>(&self, action: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        action(&mut guard)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// A latch that opens exactly once.
///
/// Every thread blocked in a wait is woken when the latch opens, and every
/// later wait returns immediately.
#[derive(Debug, Default)]
pub struct Signal {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Open the latch. Returns `false` if it was already open.
    pub fn release(&self) -> bool {
        let mut released = self.released.lock();
        if *released {
            return false;
        }
        *released = true;
        self.cond.notify_all();
        true
    }

    /// Block until the latch opens.
    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    /// Block until the latch opens or `deadline` passes. Returns whether the
    /// latch is open.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut released = self.released.lock();
        while !*released {
            if self.cond.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }
}
