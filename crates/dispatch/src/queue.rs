//! Fixed-capacity FIFO shared between submitting threads and worker loops.
//!
//! Pushes never block: a full queue is reported immediately so the caller can
//! apply backpressure. Pops block on a condition variable for at most the
//! given poll interval, which lets worker loops notice shutdown promptly.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    Full,
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push the item built by `make`, or fail without calling it.
    ///
    /// `make` runs under the queue lock only after space has been confirmed,
    /// so nothing is allocated for a rejected push.
    pub fn try_push_with<F>(&self, make: F) -> Result<(), PushError>
    where
        F: FnOnce() -> T,
    {
        let mut inner = self.lock();
        if inner.closed {
            return Err(PushError::Closed);
        }
        if inner.items.len() >= self.capacity {
            return Err(PushError::Full);
        }
        inner.items.push_back(make());
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the head item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or once the queue has been closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let inner = self.lock();
        let (mut inner, _) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |i| i.items.is_empty() && !i.closed)
            .unwrap_or_else(PoisonError::into_inner);
        inner.items.pop_front()
    }

    /// Remove the first queued item matching `pred`, preserving the order of the rest.
    pub fn remove_first<P>(&self, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut inner = self.lock();
        let pos = inner.items.iter().position(|item| pred(item))?;
        inner.items.remove(pos)
    }

    /// Refuse further pushes, wake every waiting consumer, and hand back what was queued.
    pub fn close(&self) -> Vec<T> {
        let mut inner = self.lock();
        inner.closed = true;
        let drained = inner.items.drain(..).collect();
        drop(inner);
        self.not_empty.notify_all();
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
