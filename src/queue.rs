//! Bounded, blocking, thread-safe work queue.
//!
//! A direct idiomatic port of rieMiner's `tsQueue.hpp`: pushes block while
//! the queue is at capacity, pops block while it is empty. The scheduler
//! runs Presieve, Sieve, and Check tasks through one `BoundedQueue<Task>`,
//! using `push_front`/`push_back` to mirror §4.6's "presieve tasks drain
//! first" priority instead of keeping separate physical queues; `addJob`'s
//! job queue is a second instance of this type (§6).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct BoundedQueue<T> {
    state: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks while the queue already holds `capacity` items.
    pub fn push_back(&self, item: T) {
        let mut q = self.state.lock().unwrap();
        while q.len() >= self.capacity {
            q = self.not_full.wait(q).unwrap();
        }
        q.push_back(item);
        self.not_empty.notify_one();
    }

    /// Same blocking contract as `push_back`, but jumps the queue. Used to
    /// prioritize Sieve tasks and to wake workers with dummy entries.
    pub fn push_front(&self, item: T) {
        let mut q = self.state.lock().unwrap();
        while q.len() >= self.capacity {
            q = self.not_full.wait(q).unwrap();
        }
        q.push_front(item);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available.
    pub fn pop_front(&self) -> T {
        let mut q = self.state.lock().unwrap();
        while q.is_empty() {
            q = self.not_empty.wait(q).unwrap();
        }
        let item = q.pop_front().unwrap();
        self.not_full.notify_one();
        item
    }

    /// Drops every queued item, waking any blocked pushers. Returns the
    /// number of items discarded.
    pub fn clear(&self) -> usize {
        let mut q = self.state.lock().unwrap();
        let n = q.len();
        q.clear();
        self.not_full.notify_all();
        n
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
