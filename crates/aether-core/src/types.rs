//! Core data model: events, tags, filters, and capability tokens.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A 32-byte content-addressed identifier (event id, pubkey, etc.).
pub type Bytes32 = [u8; 32];

/// The four kind-class ranges events are dispatched into for storage and
/// retention purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    /// 0..=999 — content-addressed, retained forever (subject to `retention_ns`).
    Immutable,
    /// 10_000..=19_999 — latest-wins per pubkey.
    Replaceable,
    /// 20_000..=29_999 — dispatched to live subscribers only, never stored.
    Ephemeral,
    /// 30_000..=39_999 — latest-wins per (pubkey, kind, d-tag).
    Parameterized,
}

impl KindClass {
    /// Classify a `kind` value, rejecting anything outside 0..=39_999.
    pub fn of(kind: u16) -> Result<Self> {
        match kind {
            0..=999 => Ok(KindClass::Immutable),
            10_000..=19_999 => Ok(KindClass::Replaceable),
            20_000..=29_999 => Ok(KindClass::Ephemeral),
            30_000..=39_999 => Ok(KindClass::Parameterized),
            other => Err(Error::KindOutOfRange(other)),
        }
    }
}

/// A single `(key, values)` tag attached to an event.
///
/// `key` is restricted to non-empty ASCII of at most 255 bytes; `values`
/// holds zero or more UTF-8 strings, each at most 65_535 bytes, matching
/// the wire-layout length prefixes used by [`crate::canonical`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub values: Vec<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, values: Vec<String>) -> Self {
        Tag {
            key: key.into(),
            values,
        }
    }

    /// Returns the first value, used for extracting the `d` tag of
    /// parameterized-replaceable events. Empty string if no values present.
    pub fn first_value(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or("")
    }
}

/// A signed, content-addressed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Bytes32,
    pub pubkey: Bytes32,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: Vec<u8>,
    pub sig: [u8; 64],
    /// Present iff the event carries a mined proof-of-work nonce; appended
    /// after `content` in the canonical hash input when set.
    pub pow_nonce: Option<u64>,
}

impl Event {
    pub fn kind_class(&self) -> Result<KindClass> {
        KindClass::of(self.kind)
    }

    /// The `d` tag value used to key parameterized-replaceable events, or
    /// the empty string if none is present.
    pub fn d_tag(&self) -> &str {
        self.tags
            .iter()
            .find(|t| t.key == "d")
            .map(Tag::first_value)
            .unwrap_or("")
    }
}

/// A single filter clause; all present fields are AND-ed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Option<BTreeSet<u16>>,
    /// Byte prefixes; an event matches if its pubkey starts with any one.
    pub pubkey_prefixes: Option<Vec<Vec<u8>>>,
    /// Required `(key, value)` pairs; an event matches if every pair is
    /// present among its tags' expanded `(key, value)` combinations.
    pub tags: Option<BTreeSet<(String, String)>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
}

/// A client subscription: an id plus the filters whose matches (OR-ed
/// across filters) should be dispatched to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub connection_id: String,
    pub subscription_id: String,
    pub filters: Vec<Filter>,
}

/// A delegation-chain capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub issuer_pubkey: Bytes32,
    pub subject_pubkey: Bytes32,
    pub capability: String,
    pub caveats: Caveats,
    pub sig: [u8; 64],
}

/// Usage/time restrictions a capability token carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveats {
    pub not_before: Option<u64>,
    pub not_after: Option<u64>,
    pub max_uses: Option<u64>,
}
