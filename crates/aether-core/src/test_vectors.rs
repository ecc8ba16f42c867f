//! Test vectors for cross-language validation against the wire
//! protocol's hashing rules.
//!
//! These use fixed keys/fields rather than `OsRng` so the same inputs
//! always produce the same canonical bytes and hash, the way a second
//! implementation would need to reproduce them exactly.

use crate::canonical::canonical_event_bytes;
use crate::capability::token_id;
use crate::crypto::event_id;
use crate::types::{Caveats, CapabilityToken, Tag};
use serde::Serialize;

#[derive(Serialize)]
pub struct TestVector {
    pub name: String,
    pub description: String,
    pub inputs: serde_json::Value,
    pub canonical_bytes_hex: String,
    pub hash_hex: String,
}

pub fn generate_test_vectors() -> Vec<TestVector> {
    vec![
        event_id_no_tags_vector(),
        event_id_with_tags_vector(),
        event_id_with_pow_nonce_vector(),
        capability_token_id_vector(),
    ]
}

fn event_id_no_tags_vector() -> TestVector {
    let pubkey = [0x11u8; 32];
    let created_at = 1_700_000_000u64;
    let kind = 1u16;
    let content = b"hello aether";

    let bytes = canonical_event_bytes(&pubkey, created_at, kind, &[], content, None).unwrap();
    let id = event_id(&pubkey, created_at, kind, &[], content, None).unwrap();

    TestVector {
        name: "event_id_no_tags".into(),
        description: "event_id = BLAKE3(pubkey || created_at || kind || tags || content)".into(),
        inputs: serde_json::json!({
            "pubkey_hex": hex::encode(pubkey),
            "created_at": created_at,
            "kind": kind,
            "content": String::from_utf8_lossy(content),
        }),
        canonical_bytes_hex: hex::encode(&bytes),
        hash_hex: hex::encode(id),
    }
}

fn event_id_with_tags_vector() -> TestVector {
    let pubkey = [0x22u8; 32];
    let created_at = 1_700_000_100u64;
    let kind = 30_000u16;
    let tags = vec![
        Tag::new("d", vec!["profile".into()]),
        Tag::new("e", vec!["abc".into(), "def".into()]),
    ];
    let content = b"{}";

    let bytes = canonical_event_bytes(&pubkey, created_at, kind, &tags, content, None).unwrap();
    let id = event_id(&pubkey, created_at, kind, &tags, content, None).unwrap();

    TestVector {
        name: "event_id_with_tags".into(),
        description: "event_id over a parameterized-replaceable event with a d-tag and a multi-value tag".into(),
        inputs: serde_json::json!({
            "pubkey_hex": hex::encode(pubkey),
            "created_at": created_at,
            "kind": kind,
            "tags": [
                ["d", "profile"],
                ["e", "abc", "def"],
            ],
            "content": String::from_utf8_lossy(content),
        }),
        canonical_bytes_hex: hex::encode(&bytes),
        hash_hex: hex::encode(id),
    }
}

fn event_id_with_pow_nonce_vector() -> TestVector {
    let pubkey = [0x33u8; 32];
    let created_at = 1_700_000_200u64;
    let kind = 1u16;
    let content = b"mined";
    let nonce = 424_242u64;

    let bytes =
        canonical_event_bytes(&pubkey, created_at, kind, &[], content, Some(nonce)).unwrap();
    let id = event_id(&pubkey, created_at, kind, &[], content, Some(nonce)).unwrap();

    TestVector {
        name: "event_id_with_pow_nonce".into(),
        description: "event_id with an 8-byte big-endian pow_nonce appended after content".into(),
        inputs: serde_json::json!({
            "pubkey_hex": hex::encode(pubkey),
            "created_at": created_at,
            "kind": kind,
            "content": String::from_utf8_lossy(content),
            "pow_nonce": nonce,
        }),
        canonical_bytes_hex: hex::encode(&bytes),
        hash_hex: hex::encode(id),
    }
}

fn capability_token_id_vector() -> TestVector {
    let token = CapabilityToken {
        issuer_pubkey: [0x44u8; 32],
        subject_pubkey: [0x55u8; 32],
        capability: "publish".into(),
        caveats: Caveats {
            not_before: Some(1_700_000_000),
            not_after: Some(1_700_086_400),
            max_uses: Some(10),
        },
        sig: [0u8; 64],
    };
    let id = token_id(&token).unwrap();

    TestVector {
        name: "capability_token_id".into(),
        description: "token_id = BLAKE3(issuer || subject || capability || caveats), excluding sig".into(),
        inputs: serde_json::json!({
            "issuer_pubkey_hex": hex::encode(token.issuer_pubkey),
            "subject_pubkey_hex": hex::encode(token.subject_pubkey),
            "capability": token.capability,
            "not_before": token.caveats.not_before,
            "not_after": token.caveats.not_after,
            "max_uses": token.caveats.max_uses,
        }),
        canonical_bytes_hex: String::new(),
        hash_hex: hex::encode(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_are_deterministic() {
        let a = generate_test_vectors();
        let b = generate_test_vectors();
        let hashes_a: Vec<_> = a.iter().map(|v| v.hash_hex.clone()).collect();
        let hashes_b: Vec<_> = b.iter().map(|v| v.hash_hex.clone()).collect();
        assert_eq!(hashes_a, hashes_b);
    }

    #[test]
    fn vectors_serialize_to_json() {
        let vectors = generate_test_vectors();
        assert!(!vectors.is_empty());
        let json = serde_json::to_string_pretty(&vectors).unwrap();
        assert!(json.contains("event_id_no_tags"));
    }
}
