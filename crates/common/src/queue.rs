//! Blocking queue for cross-thread handoff
//!
//! A FIFO guarded by a mutex and a condition variable. Producers never block
//! beyond the critical section; the consumer waits at most `timeout` for an
//! item. Both the compute worker's command queue and the completed-transfer
//! queue are built on it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Multi-producer FIFO with bounded-wait pop
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append to the tail and wake one waiter
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Remove the head item, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` if the queue stayed empty for the whole timeout.
    /// Spurious wakeups re-check the queue before waiting again.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut items, _timed_out) = self
            .available
            .wait_timeout_while(guard, timeout, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        items.pop_front()
    }

    /// Remove the head item without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every queued item
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    // A panic while holding the lock cannot leave the deque half-modified,
    // so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
