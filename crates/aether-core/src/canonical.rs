//! Canonical byte-level encoding used to compute event and token ids.
//!
//! This is a fixed, hand-rolled layout rather than a general-purpose
//! serializer: the hash a client computes locally must match the relay's
//! byte for byte, so the format is pinned here instead of left to a
//! serde backend's internal representation.
//!
//! Event layout: `pubkey(32) ‖ created_at(be u64) ‖ kind(be u16) ‖
//! tags ‖ content ‖ [pow_nonce(be u64)]`.
//!
//! Tags layout: `count(be u16)`, then per tag `key_len(u8) ‖ key ‖
//! value_count(be u16) ‖ [value_len(be u16) ‖ value]*`.

use crate::error::{Error, Result};
use crate::types::{Event, Tag};

const MAX_TAG_COUNT: usize = u16::MAX as usize;
const MAX_KEY_LEN: usize = u8::MAX as usize;
const MAX_VALUE_COUNT: usize = u16::MAX as usize;
const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Serialize `tags` into the fixed binary layout, validating length
/// budgets along the way.
pub fn serialize_tags(tags: &[Tag]) -> Result<Vec<u8>> {
    if tags.len() > MAX_TAG_COUNT {
        return Err(Error::InvalidTag(format!(
            "tag count {} exceeds {}",
            tags.len(),
            MAX_TAG_COUNT
        )));
    }
    let mut out = Vec::with_capacity(2 + tags.len() * 8);
    out.extend_from_slice(&(tags.len() as u16).to_be_bytes());
    for tag in tags {
        if tag.key.is_empty() {
            return Err(Error::InvalidTag("tag key must not be empty".into()));
        }
        let key_bytes = tag.key.as_bytes();
        if key_bytes.len() > MAX_KEY_LEN {
            return Err(Error::InvalidTag(format!(
                "tag key {:?} exceeds {} bytes",
                tag.key, MAX_KEY_LEN
            )));
        }
        out.push(key_bytes.len() as u8);
        out.extend_from_slice(key_bytes);

        if tag.values.len() > MAX_VALUE_COUNT {
            return Err(Error::InvalidTag(format!(
                "tag {:?} has {} values, exceeds {}",
                tag.key,
                tag.values.len(),
                MAX_VALUE_COUNT
            )));
        }
        out.extend_from_slice(&(tag.values.len() as u16).to_be_bytes());
        for value in &tag.values {
            let value_bytes = value.as_bytes();
            if value_bytes.len() > MAX_VALUE_LEN {
                return Err(Error::InvalidTag(format!(
                    "tag {:?} value exceeds {} bytes",
                    tag.key, MAX_VALUE_LEN
                )));
            }
            out.extend_from_slice(&(value_bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(value_bytes);
        }
    }
    Ok(out)
}

/// Build the exact byte message whose BLAKE3 digest is the event id.
///
/// When `pow_nonce` is `Some`, it is appended as a big-endian u64 after
/// `content`, matching [`crate::crypto::mine_pow`]'s search space.
pub fn canonical_event_bytes(
    pubkey: &[u8; 32],
    created_at: u64,
    kind: u16,
    tags: &[Tag],
    content: &[u8],
    pow_nonce: Option<u64>,
) -> Result<Vec<u8>> {
    let tag_bytes = serialize_tags(tags)?;
    let mut out = Vec::with_capacity(32 + 8 + 2 + tag_bytes.len() + content.len() + 8);
    out.extend_from_slice(pubkey);
    out.extend_from_slice(&created_at.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&tag_bytes);
    out.extend_from_slice(content);
    if let Some(nonce) = pow_nonce {
        out.extend_from_slice(&nonce.to_be_bytes());
    }
    Ok(out)
}

/// The same encoding as [`canonical_event_bytes`], but sourced from an
/// already-assembled [`Event`] (ignoring its `event_id`/`sig` fields,
/// which are outputs of, not inputs to, this computation).
pub fn canonical_bytes_for_event(event: &Event) -> Result<Vec<u8>> {
    canonical_event_bytes(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
        event.pow_nonce,
    )
}
