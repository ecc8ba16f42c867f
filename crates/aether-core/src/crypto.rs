//! Event identity, signing, and proof-of-work.

use crate::canonical::canonical_event_bytes;
use crate::error::{Error, Result};
use crate::types::{Bytes32, Event, Tag};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Compute `event_id = BLAKE3(canonical_event_bytes(..))`.
pub fn event_id(
    pubkey: &Bytes32,
    created_at: u64,
    kind: u16,
    tags: &[Tag],
    content: &[u8],
    pow_nonce: Option<u64>,
) -> Result<Bytes32> {
    let bytes = canonical_event_bytes(pubkey, created_at, kind, tags, content, pow_nonce)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

/// Sign `event_id` with an Ed25519 signing key.
pub fn sign(signing_key: &SigningKey, event_id: &Bytes32) -> [u8; 64] {
    signing_key.sign(event_id).to_bytes()
}

/// Verify `sig` over `event_id` under `pubkey`.
pub fn verify(pubkey: &Bytes32, event_id: &Bytes32, sig: &[u8; 64]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
    let signature = Signature::from_bytes(sig);
    verifying_key
        .verify(event_id, &signature)
        .map_err(|_| Error::InvalidSignature)
}

/// Recompute an event's id from its fields and compare against the
/// transmitted `event_id`, then verify the signature over it.
///
/// Returns the freshly computed id on success so callers don't need to
/// recompute it a second time.
pub fn verify_event_identity(event: &Event) -> Result<Bytes32> {
    let computed = event_id(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
        event.pow_nonce,
    )?;
    if computed != event.event_id {
        return Err(Error::HashMismatch {
            computed: hex::encode(computed),
            transmitted: hex::encode(event.event_id),
        });
    }
    verify(&event.pubkey, &computed, &event.sig)?;
    Ok(computed)
}

/// Generate a fresh Ed25519 keypair.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Count the number of leading zero bits in `data`.
pub fn leading_zero_bits(data: &[u8]) -> u32 {
    let mut count = 0u32;
    for byte in data {
        if *byte == 0 {
            count += 8;
            continue;
        }
        count += byte.leading_zeros();
        break;
    }
    count
}

/// Does `id` satisfy a proof-of-work requirement of `difficulty_bits`
/// leading zero bits? A non-positive difficulty is always satisfied.
pub fn meets_difficulty(id: &Bytes32, difficulty_bits: u32) -> bool {
    if difficulty_bits == 0 {
        return true;
    }
    leading_zero_bits(id) >= difficulty_bits
}

/// Search for a `pow_nonce` such that `event_id(..., Some(nonce))` meets
/// `difficulty_bits` leading zero bits. Returns the nonce and the id it
/// produced.
pub fn mine_pow(
    pubkey: &Bytes32,
    created_at: u64,
    kind: u16,
    tags: &[Tag],
    content: &[u8],
    difficulty_bits: u32,
) -> Result<(u64, Bytes32)> {
    let mut nonce = 0u64;
    loop {
        let id = event_id(pubkey, created_at, kind, tags, content, Some(nonce))?;
        if meets_difficulty(&id, difficulty_bits) {
            return Ok((nonce, id));
        }
        nonce = nonce.wrapping_add(1);
    }
}
