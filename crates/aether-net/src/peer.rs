//! Connection identity.

use serde::{Deserialize, Serialize};

/// Identifies one connected client for the lifetime of its session.
/// Derived from its transport-level public key when one is available
/// (e.g. after a noise handshake), otherwise assigned opaquely by the
/// dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub [u8; 32]);

impl ConnectionId {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(*public_key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
