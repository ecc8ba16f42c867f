//! aether-core
//!
//! Event model, canonical byte encoding, signing/proof-of-work, tag and
//! filter matching, bloom filter, and capability token primitives for the
//! aether relay protocol. No networking or async runtime here — this
//! crate is meant to be reusable by both the relay daemon and clients.
//!
//! # Modules
//!
//! - [`types`]: Event, Tag, Filter, Subscription, CapabilityToken
//! - [`canonical`]: fixed-layout byte encoding used for hashing
//! - [`crypto`]: event id derivation, sign/verify, proof-of-work
//! - [`filter`]: tag normalization and filter/subscription matching
//! - [`bloom`]: bloom filter for duplicate pre-checks
//! - [`capability`]: capability token delegation chains
//! - [`error`]: shared error type

pub mod bloom;
pub mod canonical;
pub mod capability;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod types;

#[cfg(test)]
mod test_vectors;

pub use error::{Error, Result};
pub use types::*;
