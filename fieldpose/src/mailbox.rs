use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::Measurement;

/// Arrival-ordered measurement queue between producers and the
/// fusion loop.
///
/// Producers push from camera threads and the subscription poller;
/// the fusion loop drains the whole queue at the head of each tick,
/// which is what makes a tick's factor commit atomic.
#[derive(Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Measurement>>,
    ready: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, m: Measurement) {
        let mut q = self.queue.lock().expect("mailbox poisoned");
        q.push_back(m);
        self.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("mailbox poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything queued, waiting up to `timeout` for the first
    /// item.
    pub fn drain_timeout(&self, timeout: Duration) -> Vec<Measurement> {
        let mut q = self.queue.lock().expect("mailbox poisoned");
        if q.is_empty() {
            let (guard, _timed_out) = self
                .ready
                .wait_timeout(q, timeout)
                .expect("mailbox poisoned");
            q = guard;
        }
        q.drain(..).collect()
    }
}
