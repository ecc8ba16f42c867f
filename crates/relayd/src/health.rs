//! Counters exposed by the health endpoint.
//!
//! The endpoint itself (`GET /healthz`) is owned by an external gateway
//! per the relay's scope; this crate only maintains the counter so a
//! binding can read it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    dropped_messages: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}
