//! Blocking in-process FIFO of order ids.
//!
//! Used by the in-memory publish mode: the create path pushes an id after
//! commit and the queue worker pops it. Nothing here survives a restart.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::order::OrderId;

#[derive(Default)]
struct QueueState {
    items: VecDeque<OrderId>,
    closed: bool,
}

/// Unbounded, thread-safe, blocking queue of order ids.
///
/// Clones share the same queue.
///
/// ## Example
///
/// ```
/// use order_pipeline::{InMemoryOrderQueue, OrderId};
/// use std::time::Duration;
///
/// let queue = InMemoryOrderQueue::new();
/// let id = OrderId::new();
/// queue.publish(id);
///
/// assert_eq!(queue.poll(Duration::from_millis(10)), Some(id));
/// assert_eq!(queue.poll(Duration::from_millis(10)), None);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryOrderQueue {
    shared: Arc<(Mutex<QueueState>, Condvar)>,
}

impl InMemoryOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id and wake one waiting consumer. Ignored once closed.
    pub fn publish(&self, order_id: OrderId) {
        let (state, ready) = &*self.shared;
        let mut state = lock_state(state);
        if state.closed {
            return;
        }
        state.items.push_back(order_id);
        ready.notify_one();
    }

    /// Block until an id is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn take(&self) -> Option<OrderId> {
        let (state, ready) = &*self.shared;
        let mut state = lock_state(state);
        loop {
            if let Some(id) = state.items.pop_front() {
                return Some(id);
            }
            if state.closed {
                return None;
            }
            state = ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`. A timeout too
    /// large to represent waits like `take`.
    pub fn poll(&self, timeout: Duration) -> Option<OrderId> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.take();
        };
        let (state, ready) = &*self.shared;
        let mut state = lock_state(state);
        loop {
            if let Some(id) = state.items.pop_front() {
                return Some(id);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Stop accepting ids and release blocked consumers once drained.
    pub fn close(&self) {
        let (state, ready) = &*self.shared;
        lock_state(state).closed = true;
        ready.notify_all();
    }

    pub fn len(&self) -> usize {
        lock_state(&self.shared.0).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned queue still holds valid ids; keep serving them.
fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
