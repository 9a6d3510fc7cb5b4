//! Single-assignment result slot bridging a worker thread and a waiting caller.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(T),
    /// Value already handed to the reader.
    Taken,
}

/// Completed exactly once; the first `complete` wins and later ones are refused.
#[derive(Debug)]
pub struct ResultFuture<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for ResultFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultFuture<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` if nobody has completed the future yet.
    ///
    /// Returns `false` (and drops `value`) when the future was already settled.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(value);
        drop(slot);
        self.ready.notify_all();
        true
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.lock(), Slot::Pending)
    }

    /// Block until a value is available or `timeout` elapses, then take it.
    ///
    /// Returns `None` on timeout, or if the value was already taken.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let slot = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| matches!(s, Slot::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Some(value),
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Taken => None,
        }
    }
}
