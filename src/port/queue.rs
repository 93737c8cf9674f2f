use crate::port::event::PendingEvent;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Blocking FIFO queue carrying dispatch work to the worker threads.
///
/// The capacity is a protocol invariant rather than an enforced bound:
/// a poll cycle queues at most `capacity - 1` events before the poll
/// sentinel returns to the queue, and only one poll sentinel circulates,
/// so occupancy never exceeds `capacity`. `offer` therefore never blocks.
pub(crate) struct EventQueue {
    /// Inner deque protected by a mutex.
    items: Mutex<VecDeque<PendingEvent>>,

    /// Condition variable takers block on.
    available: Condvar,

    /// Poll-array capacity this queue was sized against.
    capacity: usize,
}

impl EventQueue {
    /// Creates a queue sized for `capacity` poll slots.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Appends a dispatch item and wakes one taker.
    pub(crate) fn offer(&self, event: PendingEvent) {
        let mut items = self.items.lock().unwrap();
        items.push_back(event);
        debug_assert!(items.len() <= self.capacity);
        drop(items);

        self.available.notify_one();
    }

    /// Removes the oldest item, blocking until one is available.
    pub(crate) fn take(&self) -> PendingEvent {
        let mut items = self.items.lock().unwrap();

        loop {
            if let Some(event) = items.pop_front() {
                return event;
            }
            items = self.available.wait(items).unwrap();
        }
    }
}
