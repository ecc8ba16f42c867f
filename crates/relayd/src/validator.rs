//! Event validation pipeline.
//!
//! Checks run in a fixed order and short-circuit on the first failure.
//! Signature verification happens *before* the rate limiter is consulted
//! — consuming a rate-limit token for an event that turns out to carry a
//! forged signature would let an attacker exhaust a victim's budget for
//! free, so identity must be established first.

use crate::limits::{self, LimitError, RateLimiter};
use aether_core::crypto::{meets_difficulty, verify_event_identity};
use aether_core::types::Event;
use thiserror::Error;

/// Window, in nanoseconds, within which `created_at` must fall relative
/// to the validator's clock.
pub const DEFAULT_WINDOW_NS: u64 = 60_000_000_000;
/// Highest `kind` value accepted by any kind class.
pub const MAX_KIND: u16 = 39_999;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("kind {0} out of supported range (0..={MAX_KIND})")]
    KindOutOfRange(u16),
    #[error("event exceeds configured size limit: {0}")]
    TooLarge(#[from] LimitError),
    #[error("recomputed event id does not match transmitted id")]
    HashMismatch,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("proof of work below required difficulty")]
    InsufficientWork,
    #[error("created_at {created_at} is outside the acceptance window around now={now}")]
    OutsideWindow { created_at: u64, now: u64 },
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Parameters a relay deployment fixes at startup.
pub struct ValidatorConfig {
    pub max_event_size: usize,
    pub pow_difficulty_bits: u32,
    pub window_ns: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_event_size: 0,
            pow_difficulty_bits: 0,
            window_ns: DEFAULT_WINDOW_NS,
        }
    }
}

/// Run the full ordered validation pipeline against `event`.
pub fn validate_event(
    event: &Event,
    config: &ValidatorConfig,
    rate_limiter: &RateLimiter,
    now_ns: u64,
) -> Result<(), ValidationError> {
    // 1. kind range
    if event.kind > MAX_KIND {
        return Err(ValidationError::KindOutOfRange(event.kind));
    }

    // 2. size guard
    limits::enforce_max_size(event, config.max_event_size)?;

    // 3+4. recompute event_id and compare, then verify signature
    match verify_event_identity(event) {
        Ok(_) => {}
        Err(aether_core::Error::HashMismatch { .. }) => return Err(ValidationError::HashMismatch),
        Err(_) => return Err(ValidationError::InvalidSignature),
    }

    // 5. proof of work
    if config.pow_difficulty_bits > 0 && !meets_difficulty(&event.event_id, config.pow_difficulty_bits)
    {
        return Err(ValidationError::InsufficientWork);
    }

    // 6. acceptance window
    let delta = now_ns.abs_diff(event.created_at);
    if delta > config.window_ns {
        return Err(ValidationError::OutsideWindow {
            created_at: event.created_at,
            now: now_ns,
        });
    }

    // 7. rate limiter — deliberately last, after identity is established.
    if !rate_limiter.allow(&event.pubkey, now_ns) {
        return Err(ValidationError::RateLimited);
    }

    Ok(())
}
