//! Per-pubkey rate limiting and event size enforcement.

use aether_core::types::{Bytes32, Event};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("event size {actual} exceeds configured maximum {max}")]
    TooLarge { actual: usize, max: usize },
    #[error("rate limit exceeded for publisher")]
    RateLimited,
}

/// A token bucket with fractional tokens, refilled lazily on each
/// consume/check rather than by a background timer.
#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    updated_ns: u64,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_second: f64, now_ns: u64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_second,
            tokens: capacity as f64,
            updated_ns: now_ns,
        }
    }

    fn refill(&mut self, now_ns: u64) {
        if now_ns <= self.updated_ns {
            return;
        }
        let delta_seconds = (now_ns - self.updated_ns) as f64 / 1_000_000_000.0;
        self.tokens = (self.tokens + delta_seconds * self.refill_per_second).min(self.capacity);
        self.updated_ns = now_ns;
    }

    fn consume(&mut self, now_ns: u64, amount: f64) -> bool {
        self.refill(now_ns);
        if self.tokens < amount {
            return false;
        }
        self.tokens -= amount;
        true
    }
}

/// Per-pubkey token-bucket rate limiter.
pub struct RateLimiter {
    capacity: u32,
    refill_per_second: f64,
    buckets: RwLock<HashMap<Bytes32, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Consume one token for `pubkey`, lazily creating a full bucket on
    /// first use. Returns `false` if the publisher should be rejected.
    pub fn allow(&self, pubkey: &Bytes32, now_ns: u64) -> bool {
        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(*pubkey)
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_per_second, now_ns));
        bucket.consume(now_ns, 1.0)
    }
}

/// The on-wire byte cost of an event, mirroring what a hostile client
/// could send: every field's serialized length, not the in-memory
/// `std::mem::size_of`.
pub fn compute_event_size(event: &Event) -> usize {
    let tag_bytes = aether_core::canonical::serialize_tags(&event.tags)
        .map(|b| b.len())
        .unwrap_or(0);
    event.event_id.len()
        + event.pubkey.len()
        + 8 // created_at
        + 2 // kind
        + tag_bytes
        + event.content.len()
        + event.sig.len()
}

/// Reject events over `max_size` bytes as computed by
/// [`compute_event_size`]. A `max_size` of 0 disables the check.
pub fn enforce_max_size(event: &Event, max_size: usize) -> Result<(), LimitError> {
    if max_size == 0 {
        return Ok(());
    }
    let actual = compute_event_size(event);
    if actual > max_size {
        return Err(LimitError::TooLarge {
            actual,
            max: max_size,
        });
    }
    Ok(())
}
