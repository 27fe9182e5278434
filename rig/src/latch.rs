//! Completion latch
//!
//! One single-shot slot per worker. `wait` blocks until every slot is set.
//! The latch does not look at threads at all, so it stays correct for workers
//! whose OS thread is never joined.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Lock with poison recovery
///
/// Used from drop guards and unwinding paths, where a second panic would abort
/// the process.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Slots {
    done: Vec<bool>,
    remaining: usize,
}

#[derive(Debug)]
pub(crate) struct CompletionLatch {
    slots: Mutex<Slots>,
    cv: Condvar,
}

impl CompletionLatch {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                done: vec![false; count],
                remaining: count,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        lock_unpoisoned(&self.slots)
    }

    /// Set slot `index`. Setting an already-set slot is a no-op.
    pub(crate) fn signal(&self, index: usize) {
        let mut slots = self.lock();
        let Some(done) = slots.done.get_mut(index) else {
            return;
        };
        if *done {
            return;
        }
        *done = true;
        slots.remaining -= 1;
        debug!(index, remaining = slots.remaining, "CompletionLatch::signal");
        if slots.remaining == 0 {
            self.cv.notify_all();
        }
    }

    /// Block until every slot has been set
    pub(crate) fn wait(&self) {
        let mut slots = self.lock();
        while slots.remaining > 0 {
            slots = self.cv.wait(slots).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.lock().remaining
    }

    pub(crate) fn is_signaled(&self, index: usize) -> bool {
        self.lock().done.get(index).copied().unwrap_or(false)
    }
}

/// Signals one latch slot when dropped, on every exit path including unwinding
pub(crate) struct CompletionGuard<'a> {
    latch: &'a CompletionLatch,
    index: usize,
}

impl<'a> CompletionGuard<'a> {
    pub(crate) fn new(latch: &'a CompletionLatch, index: usize) -> Self {
        Self { latch, index }
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.latch.signal(self.index);
    }
}
