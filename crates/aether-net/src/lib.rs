//! aether-net
//!
//! Wire framing, message negotiation, and the encrypted channel overlay
//! for the aether relay protocol. Concrete transport socket setup
//! (WebSocket/QUIC/HTTP/SSE) is out of scope — this crate only defines
//! the bytes that flow over whatever socket a binding provides.

pub mod crypto;
pub mod framing;
pub mod noise;
pub mod peer;
pub mod wire;

pub use crypto::{EphemeralKeyExchange, KeyPair};
pub use framing::{Frame, FrameCodec, FrameType};
pub use noise::NoiseChannel;
pub use peer::ConnectionId;
pub use wire::{Encoding, Message};
