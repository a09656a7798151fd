//! A small fixed-capacity single-producer/single-consumer ring buffer of
//! PDU-sized byte slots, used to hand raw datagrams from a [`super::source::Base`]'s
//! reader thread to its consumer without per-packet heap churn beyond the
//! slot vector itself.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct CircularBuffer {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct State {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State { queue: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Blocks while the buffer is full; returns `false` if the buffer was
    /// closed instead of accepting the datagram.
    pub fn push(&self, datagram: Vec<u8>) -> bool {
        let mut state = self.state.lock().expect("circular buffer mutex poisoned");
        while state.queue.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).expect("circular buffer mutex poisoned");
        }
        if state.closed {
            return false;
        }
        state.queue.push_back(datagram);
        self.not_empty.notify_one();
        true
    }

    /// Blocks while the buffer is empty; returns `None` once the buffer is
    /// closed and drained.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().expect("circular buffer mutex poisoned");
        while state.queue.is_empty() && !state.closed {
            state = self.not_empty.wait(state).expect("circular buffer mutex poisoned");
        }
        let item = state.queue.pop_front();
        self.not_full.notify_one();
        item
    }

    pub fn close(&self) {
        let mut state = self.state.lock().expect("circular buffer mutex poisoned");
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("circular buffer mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
