//! Error types shared across event encoding, crypto, and matching.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-width field (pubkey, sig, event_id) had the wrong length.
    #[error("invalid field length for {field}: expected {expected}, got {got}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// `kind` fell outside the supported 0..=39_999 range.
    #[error("kind {0} out of supported range")]
    KindOutOfRange(u16),

    /// A tag key or value exceeded its length budget or was empty.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Recomputed event_id did not match the transmitted one.
    #[error("hash mismatch: computed {computed} != transmitted {transmitted}")]
    HashMismatch { computed: String, transmitted: String },

    /// Ed25519 signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// A public key byte string was malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Proof-of-work did not meet the configured difficulty.
    #[error("proof of work below required difficulty: need {required} leading zero bits, got {actual}")]
    InsufficientWork { required: u32, actual: u32 },
}
