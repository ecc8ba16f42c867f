//! Bounded per-subscription outbound queue.
//!
//! The SSE/long-poll transport this backs is out of scope, but its
//! backpressure behavior is named directly in the relay's concurrency
//! model: a full queue drops the oldest message rather than blocking the
//! publisher or the subscriber, and a reader idle for 15s should receive
//! a heartbeat rather than hang.

use crate::health::HealthState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_CAPACITY: usize = 1024;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// What [`BoundedQueue::next`] produced.
pub enum Delivery<T> {
    Message(T),
    Heartbeat,
}

/// A single-consumer, multi-producer bounded queue with drop-oldest
/// semantics on overflow.
pub struct BoundedQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    health: Arc<HealthState>,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, health: Arc<HealthState>) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            health,
        }
    }

    /// Push a message. If the queue is already at capacity, the oldest
    /// queued message is dropped and `dropped_messages` is incremented —
    /// never blocks, never rejects the new message.
    pub fn push(&self, item: T) {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                items.pop_front();
                self.health.record_dropped();
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Wait for the next message, or a heartbeat if none arrives within
    /// [`HEARTBEAT_INTERVAL`] of idle time.
    pub async fn next(&self) -> Delivery<T> {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return Delivery::Message(item);
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => return Delivery::Heartbeat,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
