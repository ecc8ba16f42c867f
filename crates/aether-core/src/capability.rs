//! Capability token delegation chains.

use crate::error::Error as CoreError;
use crate::types::{Bytes32, CapabilityToken};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability chain is empty")]
    EmptyChain,
    #[error("token signature invalid")]
    BadSignature,
    #[error("invalid public key in token: {0}")]
    InvalidPublicKey(String),
    #[error("token not yet valid: not_before {not_before} > now {now}")]
    NotYetValid { not_before: u64, now: u64 },
    #[error("token expired: not_after {not_after} < now {now}")]
    Expired { not_after: u64, now: u64 },
    #[error("token usage exceeded: used {used} >= max {max}")]
    UsageExceeded { used: u64, max: u64 },
    #[error("chain broken: token {index} subject does not match token {next} issuer")]
    ChainBroken { index: usize, next: usize },
    #[error("chain does not grant capability {0:?}")]
    WrongCapability(String),
}

/// Compute the id of a token's canonical fields, excluding `sig`.
///
/// Tokens are hashed the same way events are: a fixed byte layout over
/// issuer/subject/capability/caveats, so a client can compute a token id
/// without touching a general-purpose serializer.
pub fn token_id(token: &CapabilityToken) -> Result<Bytes32, CoreError> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&token.issuer_pubkey);
    bytes.extend_from_slice(&token.subject_pubkey);
    let cap_bytes = token.capability.as_bytes();
    if cap_bytes.len() > u16::MAX as usize {
        return Err(CoreError::InvalidTag("capability name too long".into()));
    }
    bytes.extend_from_slice(&(cap_bytes.len() as u16).to_be_bytes());
    bytes.extend_from_slice(cap_bytes);
    bytes.extend_from_slice(&token.caveats.not_before.unwrap_or(0).to_be_bytes());
    bytes.extend_from_slice(&token.caveats.not_after.unwrap_or(u64::MAX).to_be_bytes());
    bytes.extend_from_slice(&token.caveats.max_uses.unwrap_or(u64::MAX).to_be_bytes());
    Ok(*blake3::hash(&bytes).as_bytes())
}

/// Sign a fresh token's payload with the issuer's signing key.
pub fn sign_token(
    signing_key: &SigningKey,
    subject_pubkey: Bytes32,
    capability: impl Into<String>,
    caveats: crate::types::Caveats,
) -> Result<CapabilityToken, CoreError> {
    let mut token = CapabilityToken {
        issuer_pubkey: signing_key.verifying_key().to_bytes(),
        subject_pubkey,
        capability: capability.into(),
        caveats,
        sig: [0u8; 64],
    };
    let id = token_id(&token)?;
    token.sig = signing_key.sign(&id).to_bytes();
    Ok(token)
}

/// Verify a single token's id binding and signature.
fn verify_token(token: &CapabilityToken) -> Result<Bytes32, CapabilityError> {
    let id = token_id(token).map_err(|e| CapabilityError::InvalidPublicKey(e.to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&token.issuer_pubkey)
        .map_err(|e| CapabilityError::InvalidPublicKey(e.to_string()))?;
    let signature = Signature::from_bytes(&token.sig);
    verifying_key
        .verify(&id, &signature)
        .map_err(|_| CapabilityError::BadSignature)?;
    Ok(id)
}

/// Verify a delegation chain: every token's signature is valid, every
/// token's time/usage caveats hold at `now_ns`, and each token's subject
/// matches the next token's issuer. `usage` maps a token id to how many
/// times it has already been consumed.
pub fn verify_chain(
    chain: &[CapabilityToken],
    now_ns: u64,
    usage: &HashMap<Bytes32, u64>,
) -> Result<(), CapabilityError> {
    if chain.is_empty() {
        return Err(CapabilityError::EmptyChain);
    }
    for (index, token) in chain.iter().enumerate() {
        let id = verify_token(token)?;

        if let Some(not_before) = token.caveats.not_before {
            if now_ns < not_before {
                return Err(CapabilityError::NotYetValid {
                    not_before,
                    now: now_ns,
                });
            }
        }
        if let Some(not_after) = token.caveats.not_after {
            if now_ns > not_after {
                return Err(CapabilityError::Expired {
                    not_after,
                    now: now_ns,
                });
            }
        }
        if let Some(max_uses) = token.caveats.max_uses {
            let used = usage.get(&id).copied().unwrap_or(0);
            if used >= max_uses {
                return Err(CapabilityError::UsageExceeded { used, max: max_uses });
            }
        }

        if let Some(next) = chain.get(index + 1) {
            if token.subject_pubkey != next.issuer_pubkey {
                return Err(CapabilityError::ChainBroken {
                    index,
                    next: index + 1,
                });
            }
        }
    }
    Ok(())
}

/// Verify the chain and confirm every token in it grants `required` — a
/// delegation can only narrow, so one intermediate token carrying a
/// different capability must not let the chain through.
pub fn enforce_capability(
    chain: &[CapabilityToken],
    required: &str,
    now_ns: u64,
    usage: &HashMap<Bytes32, u64>,
) -> Result<(), CapabilityError> {
    verify_chain(chain, now_ns, usage)?;
    if chain.iter().any(|token| token.capability != required) {
        return Err(CapabilityError::WrongCapability(required.to_string()));
    }
    Ok(())
}
