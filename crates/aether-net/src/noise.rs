//! The encrypted channel overlay: a single derived symmetric key plus a
//! monotonic send counter, not a full Noise handshake pattern.
//!
//! Key derivation: X25519 ECDH followed by HKDF-SHA256 with an empty salt
//! and the info string `"aether-noise"`, producing one 32-byte key shared
//! by both directions — this matches how the original relay's handshake
//! derives a single session key rather than separate per-direction keys.
//!
//! Wire nonce: 12 bytes, the first 4 always zero, the last 8 a
//! big-endian send counter prepended to each ciphertext so the receiver
//! can reconstruct it without separately tracking per-message state.
//!
//! Anti-replay: the receiver keeps the highest counter it has accepted
//! plus a sliding bitmap over the trailing [`REPLAY_WINDOW`] counters, and
//! rejects anything already seen or too far behind the window.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::SharedSecret;

const HKDF_INFO: &[u8] = b"aether-noise";
const REPLAY_WINDOW: u64 = 64;

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("key derivation failed")]
    KeyDerivationFailed,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("frame too short to contain a counter prefix")]
    FrameTooShort,
    #[error("counter {counter} already seen or outside the replay window (high watermark {high_watermark})")]
    ReplayRejected { counter: u64, high_watermark: u64 },
}

/// Derive the single 32-byte session key both sides use.
pub fn derive_session_key(shared_secret: &SharedSecret) -> Result<[u8; 32], NoiseError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|_| NoiseError::KeyDerivationFailed)?;
    Ok(key)
}

fn nonce_for(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..12].copy_from_slice(&counter.to_be_bytes());
    *Nonce::from_slice(&bytes)
}

/// An established encrypted channel: one key, a send-side counter, and a
/// receive-side replay window.
pub struct NoiseChannel {
    cipher: ChaCha20Poly1305,
    send_counter: u64,
    high_watermark: Option<u64>,
    seen_bitmap: u64,
}

impl NoiseChannel {
    pub fn new(key: [u8; 32]) -> Result<Self, NoiseError> {
        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| NoiseError::InvalidKeyLength)?;
        Ok(Self {
            cipher,
            send_counter: 0,
            high_watermark: None,
            seen_bitmap: 0,
        })
    }

    /// Encrypt `plaintext`, returning `counter(8, be) ‖ ciphertext`.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let counter = self.send_counter;
        self.send_counter += 1;
        let nonce = nonce_for(counter);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| NoiseError::EncryptionFailed)?;
        let mut out = Vec::with_capacity(8 + ciphertext.len());
        out.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a frame produced by [`Self::encrypt`], rejecting replayed
    /// or out-of-window counters before attempting AEAD decryption.
    pub fn decrypt(&mut self, frame: &[u8], aad: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if frame.len() < 8 {
            return Err(NoiseError::FrameTooShort);
        }
        let counter = u64::from_be_bytes(frame[0..8].try_into().unwrap());
        self.check_and_record(counter)?;

        let nonce = nonce_for(counter);
        self.cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: &frame[8..],
                    aad,
                },
            )
            .map_err(|_| NoiseError::DecryptionFailed)
    }

    fn check_and_record(&mut self, counter: u64) -> Result<(), NoiseError> {
        match self.high_watermark {
            None => {
                self.high_watermark = Some(counter);
                self.seen_bitmap = 1;
                Ok(())
            }
            Some(high) if counter > high => {
                let shift = counter - high;
                self.seen_bitmap = if shift >= 64 { 0 } else { self.seen_bitmap << shift };
                self.seen_bitmap |= 1;
                self.high_watermark = Some(counter);
                Ok(())
            }
            Some(high) => {
                let back = high - counter;
                if back >= REPLAY_WINDOW {
                    return Err(NoiseError::ReplayRejected {
                        counter,
                        high_watermark: high,
                    });
                }
                let bit = 1u64 << back;
                if self.seen_bitmap & bit != 0 {
                    return Err(NoiseError::ReplayRejected {
                        counter,
                        high_watermark: high,
                    });
                }
                self.seen_bitmap |= bit;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EphemeralKeyExchange;

    fn paired_channels() -> (NoiseChannel, NoiseChannel) {
        let alice = EphemeralKeyExchange::new();
        let bob = EphemeralKeyExchange::new();
        let alice_pub = alice.public_key();
        let bob_pub = bob.public_key();
        let alice_shared = alice.exchange(&bob_pub);
        let bob_shared = bob.exchange(&alice_pub);
        let alice_key = derive_session_key(&alice_shared).unwrap();
        let bob_key = derive_session_key(&bob_shared).unwrap();
        assert_eq!(alice_key, bob_key);
        (
            NoiseChannel::new(alice_key).unwrap(),
            NoiseChannel::new(bob_key).unwrap(),
        )
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let (mut alice, mut bob) = paired_channels();
        let frame = alice.encrypt(b"hello", b"").unwrap();
        let plaintext = bob.decrypt(&frame, b"").unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn replayed_counter_is_rejected() {
        let (mut alice, mut bob) = paired_channels();
        let frame = alice.encrypt(b"hello", b"").unwrap();
        assert!(bob.decrypt(&frame, b"").is_ok());
        assert!(matches!(
            bob.decrypt(&frame, b""),
            Err(NoiseError::ReplayRejected { .. })
        ));
    }

    #[test]
    fn out_of_window_counter_is_rejected() {
        let (mut alice, mut bob) = paired_channels();
        let first = alice.encrypt(b"first", b"").unwrap();
        for _ in 0..100 {
            let frame = alice.encrypt(b"filler", b"").unwrap();
            bob.decrypt(&frame, b"").unwrap();
        }
        assert!(matches!(
            bob.decrypt(&first, b""),
            Err(NoiseError::ReplayRejected { .. })
        ));
    }

    #[test]
    fn out_of_order_within_window_is_accepted() {
        let (mut alice, mut bob) = paired_channels();
        let a = alice.encrypt(b"a", b"").unwrap();
        let b = alice.encrypt(b"b", b"").unwrap();
        bob.decrypt(&b, b"").unwrap();
        bob.decrypt(&a, b"").unwrap();
    }
}
