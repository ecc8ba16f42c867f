//! Wire messages and HELLO/WELCOME negotiation.
//!
//! Two encodings are supported: JSON (the default and fallback) and a
//! "compact binary" encoding that is deliberately simple — a one-byte
//! message type followed by the same JSON payload. A fully typed binary
//! schema per message type would parse faster and encode smaller, but
//! this placeholder keeps the wire format trivial to extend while the
//! message shapes are still settling.

use aether_core::types::{CapabilityToken, Caveats, Event, Filter, Tag};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message type byte: {0}")]
    UnknownType(u8),
    #[error("binary frame missing type byte")]
    Empty,
    #[error("invalid hex in field {field}: {source}")]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
    #[error("field {field} must be {expected} bytes, got {got}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("tag at index {0} has no key")]
    EmptyTagShape(usize),
    #[error("event content is not valid utf-8: {0}")]
    InvalidContentUtf8(#[from] std::string::FromUtf8Error),
}

fn decode_hex_array<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], WireError> {
    let bytes = hex::decode(s).map_err(|source| WireError::InvalidHex { field, source })?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| WireError::InvalidFieldLength { field, expected: N, got: len })
}

/// The event shape a client speaks on the wire: hex-encoded id/pubkey/sig,
/// positional `[key, v1, v2, ...]` tag rows, and content carried as text.
/// [`aether_core::types::Event`] keeps these as raw bytes internally; the
/// conversion between the two happens once at each side of this boundary,
/// never ad hoc at individual call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub event_id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
    /// Not part of the original message schema; carried so a PoW-mined
    /// event's id remains independently verifiable by the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pow_nonce: Option<u64>,
}

impl TryFrom<&Event> for WireEvent {
    type Error = WireError;

    fn try_from(event: &Event) -> Result<Self, Self::Error> {
        let content = String::from_utf8(event.content.clone())?;
        let tags = event
            .tags
            .iter()
            .map(|tag| {
                let mut row = Vec::with_capacity(1 + tag.values.len());
                row.push(tag.key.clone());
                row.extend(tag.values.iter().cloned());
                row
            })
            .collect();
        Ok(WireEvent {
            event_id: hex::encode(event.event_id),
            pubkey: hex::encode(event.pubkey),
            kind: event.kind,
            created_at: event.created_at,
            tags,
            content,
            sig: hex::encode(event.sig),
            pow_nonce: event.pow_nonce,
        })
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = WireError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let event_id = decode_hex_array::<32>("event_id", &wire.event_id)?;
        let pubkey = decode_hex_array::<32>("pubkey", &wire.pubkey)?;
        let sig = decode_hex_array::<64>("sig", &wire.sig)?;
        let mut tags = Vec::with_capacity(wire.tags.len());
        for (index, mut row) in wire.tags.into_iter().enumerate() {
            if row.is_empty() {
                return Err(WireError::EmptyTagShape(index));
            }
            let key = row.remove(0);
            tags.push(Tag::new(key, row));
        }
        Ok(Event {
            event_id,
            pubkey,
            created_at: wire.created_at,
            kind: wire.kind,
            tags,
            content: wire.content.into_bytes(),
            sig,
            pow_nonce: wire.pow_nonce,
        })
    }
}

/// The wire shape of a capability token: hex-encoded keys/signature,
/// matching [`WireEvent`]'s convert-once-at-the-boundary approach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCapabilityToken {
    pub issuer_pubkey: String,
    pub subject_pubkey: String,
    pub capability: String,
    pub caveats: Caveats,
    pub sig: String,
}

impl TryFrom<&CapabilityToken> for WireCapabilityToken {
    type Error = WireError;

    fn try_from(token: &CapabilityToken) -> Result<Self, Self::Error> {
        Ok(WireCapabilityToken {
            issuer_pubkey: hex::encode(token.issuer_pubkey),
            subject_pubkey: hex::encode(token.subject_pubkey),
            capability: token.capability.clone(),
            caveats: token.caveats.clone(),
            sig: hex::encode(token.sig),
        })
    }
}

impl TryFrom<WireCapabilityToken> for CapabilityToken {
    type Error = WireError;

    fn try_from(wire: WireCapabilityToken) -> Result<Self, Self::Error> {
        Ok(CapabilityToken {
            issuer_pubkey: decode_hex_array::<32>("issuer_pubkey", &wire.issuer_pubkey)?,
            subject_pubkey: decode_hex_array::<32>("subject_pubkey", &wire.subject_pubkey)?,
            capability: wire.capability,
            caveats: wire.caveats,
            sig: decode_hex_array::<64>("sig", &wire.sig)?,
        })
    }
}

/// Noise parameters a client offers in its HELLO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseHello {
    pub required: bool,
    /// The client's ephemeral X25519 public key, hex-encoded, present iff
    /// `required` is true.
    pub pubkey: Option<String>,
}

/// Noise parameters the server commits to in its WELCOME.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseWelcome {
    pub required: bool,
    pub pubkey: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Hello {
        version: u32,
        formats: Vec<String>,
        noise: Option<NoiseHello>,
    },
    Welcome {
        version: u32,
        format: String,
        noise: Option<NoiseWelcome>,
    },
    Publish {
        event: WireEvent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capability_chain: Option<Vec<WireCapabilityToken>>,
    },
    Subscribe {
        #[serde(rename = "sub_id")]
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Unsubscribe {
        #[serde(rename = "sub_id")]
        subscription_id: String,
    },
    Event {
        #[serde(rename = "sub_id")]
        subscription_id: String,
        event: WireEvent,
    },
    Ack {},
    Error {
        error: String,
    },
    Noise {
        payload_hex: String,
    },
}

impl Message {
    fn frame_type(&self) -> u8 {
        match self {
            Message::Hello { .. } => 0,
            Message::Welcome { .. } => 1,
            Message::Publish { .. } => 2,
            Message::Subscribe { .. } => 3,
            Message::Unsubscribe { .. } => 4,
            Message::Event { .. } => 5,
            Message::Ack {} => 6,
            Message::Error { .. } => 7,
            Message::Noise { .. } => 8,
        }
    }
}

/// The negotiated wire encoding for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Binary,
}

pub fn encode(message: &Message, encoding: Encoding) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(message)?;
    match encoding {
        Encoding::Json => Ok(json),
        Encoding::Binary => {
            let mut out = Vec::with_capacity(1 + json.len());
            out.push(message.frame_type());
            out.extend_from_slice(&json);
            Ok(out)
        }
    }
}

pub fn decode(raw: &[u8], encoding: Encoding) -> Result<Message, WireError> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(raw)?),
        Encoding::Binary => {
            if raw.is_empty() {
                return Err(WireError::Empty);
            }
            // The type byte is redundant with serde's internal `type` tag
            // but is kept so a receiver can dispatch without touching the
            // JSON payload, matching the two-field table the compact
            // binary format describes.
            Ok(serde_json::from_slice(&raw[1..])?)
        }
    }
}

/// Does `raw` look like a JSON document? Used before a handshake
/// completes to sniff format when a peer hasn't declared one yet.
pub fn sniff_is_json(raw: &[u8]) -> bool {
    raw.first() == Some(&b'{')
}

/// Negotiate the wire encoding and noise requirement from a client's
/// HELLO, given the set of formats this server supports (in preference
/// order). When the client's HELLO requests noise, the WELCOME echoes
/// `required: true` and carries the server's own ephemeral X25519
/// public key (hex-encoded) so the client can derive the shared secret;
/// a client that didn't ask for noise gets `noise: None` back.
pub fn negotiate(
    hello_formats: &[String],
    server_supported: &[&str],
    version: u32,
    hello_noise: Option<&NoiseHello>,
    server_noise_pubkey: Option<&str>,
) -> Message {
    let chosen = server_supported
        .iter()
        .find(|fmt| hello_formats.iter().any(|offered| offered == *fmt))
        .copied()
        .unwrap_or("json");
    let noise = match hello_noise {
        Some(hello) if hello.required => Some(NoiseWelcome {
            required: true,
            pubkey: server_noise_pubkey.map(str::to_string),
        }),
        _ => None,
    };
    Message::Welcome {
        version,
        format: chosen.to_string(),
        noise,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::crypto::{event_id, generate_keypair, sign};

    fn sample_event() -> Event {
        let key = generate_keypair();
        let pubkey = key.verifying_key().to_bytes();
        let tags = vec![Tag::new("e", vec!["abc".into(), "def".into()])];
        let id = event_id(&pubkey, 1_000, 1, &tags, b"hello world", None).unwrap();
        let sig = sign(&key, &id);
        Event {
            event_id: id,
            pubkey,
            created_at: 1_000,
            kind: 1,
            tags,
            content: b"hello world".to_vec(),
            sig,
            pow_nonce: None,
        }
    }

    #[test]
    fn wire_event_hex_encodes_binary_fields_and_flattens_tags() {
        let event = sample_event();
        let wire = WireEvent::try_from(&event).unwrap();
        assert_eq!(wire.event_id, hex::encode(event.event_id));
        assert_eq!(wire.pubkey, hex::encode(event.pubkey));
        assert_eq!(wire.sig, hex::encode(event.sig));
        assert_eq!(wire.tags, vec![vec!["e".to_string(), "abc".to_string(), "def".to_string()]]);
        assert_eq!(wire.content, "hello world");
    }

    #[test]
    fn wire_event_round_trips_through_event() {
        let event = sample_event();
        let wire = WireEvent::try_from(&event).unwrap();
        let restored = Event::try_from(wire).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn publish_message_encodes_as_hex_and_positional_tags_over_json() {
        let event = sample_event();
        let msg = Message::Publish {
            event: WireEvent::try_from(&event).unwrap(),
            capability_chain: None,
        };
        let bytes = encode(&msg, Encoding::Json).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["event"]["event_id"], hex::encode(event.event_id));
        assert_eq!(json["event"]["tags"][0][0], "e");
        let decoded = decode(&bytes, Encoding::Json).unwrap();
        match decoded {
            Message::Publish { event: wire_event, .. } => {
                assert_eq!(Event::try_from(wire_event).unwrap(), event);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn subscribe_message_uses_sub_id_on_the_wire() {
        let msg = Message::Subscribe {
            subscription_id: "s1".into(),
            filters: vec![Filter::default()],
        };
        let bytes = encode(&msg, Encoding::Json).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["sub_id"], "s1");
    }

    #[test]
    fn json_round_trip() {
        let msg = Message::Ack {};
        let bytes = encode(&msg, Encoding::Json).unwrap();
        let decoded = decode(&bytes, Encoding::Json).unwrap();
        assert!(matches!(decoded, Message::Ack {}));
    }

    #[test]
    fn binary_round_trip_preserves_type_byte() {
        let msg = Message::Unsubscribe {
            subscription_id: "sub1".into(),
        };
        let bytes = encode(&msg, Encoding::Binary).unwrap();
        assert_eq!(bytes[0], 4);
        let decoded = decode(&bytes, Encoding::Binary).unwrap();
        match decoded {
            Message::Unsubscribe { subscription_id } => assert_eq!(subscription_id, "sub1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negotiate_prefers_binary_when_both_offer_it() {
        let formats = vec!["binary".to_string(), "json".to_string()];
        let welcome = negotiate(&formats, &["binary", "json"], 1, None, None);
        match welcome {
            Message::Welcome { format, .. } => assert_eq!(format, "binary"),
            _ => panic!("expected welcome"),
        }
    }

    #[test]
    fn negotiate_falls_back_to_json() {
        let formats = vec!["exotic".to_string()];
        let welcome = negotiate(&formats, &["binary", "json"], 1, None, None);
        match welcome {
            Message::Welcome { format, .. } => assert_eq!(format, "json"),
            _ => panic!("expected welcome"),
        }
    }

    #[test]
    fn negotiate_echoes_noise_pubkey_when_requested() {
        let formats = vec!["json".to_string()];
        let hello_noise = NoiseHello {
            required: true,
            pubkey: Some("abcd".into()),
        };
        let welcome = negotiate(&formats, &["binary", "json"], 1, Some(&hello_noise), Some("ef01"));
        match welcome {
            Message::Welcome { noise: Some(n), .. } => {
                assert!(n.required);
                assert_eq!(n.pubkey.as_deref(), Some("ef01"));
            }
            _ => panic!("expected welcome with noise"),
        }
    }

    #[test]
    fn negotiate_omits_noise_when_not_requested() {
        let formats = vec!["json".to_string()];
        let welcome = negotiate(&formats, &["binary", "json"], 1, None, Some("ef01"));
        match welcome {
            Message::Welcome { noise, .. } => assert!(noise.is_none()),
            _ => panic!("expected welcome"),
        }
    }

    #[test]
    fn sniff_detects_json_prefix() {
        assert!(sniff_is_json(b"{\"type\":\"hello\"}"));
        assert!(!sniff_is_json(&[0u8, 1, 2]));
    }
}
