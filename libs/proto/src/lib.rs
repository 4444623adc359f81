//! DCNet tunnel wire protocol.
//!
//! The tunnel carries raw Ethernet frames over a single TCP stream:
//!
//! ```text
//! client -> server   06 00 'D' 'C' 'N' 'E' 'T' 01      (handshake, once)
//! both ways          u16le len | len bytes of frame    (repeating)
//! ```
//!
//! This crate has no socket or interface handling of its own beyond the
//! handshake read; the relay engine drives the codec against its buffers.

mod error;
pub mod ethernet;
pub mod frame;
pub mod handshake;

pub use error::ProtoError;
pub use ethernet::is_filtered_multicast;
pub use frame::{
    encode_frame, encode_header, try_decode_frame, DecodedFrame, BUFFER_CAPACITY, HEADER_LEN,
    MAX_PAYLOAD,
};
pub use handshake::{
    read_handshake, validate_handshake, HandshakeError, DEFAULT_HANDSHAKE_TIMEOUT, HANDSHAKE,
    HANDSHAKE_LEN, PROTOCOL_ID, PROTOCOL_VERSION,
};

/// Default TCP port of the tunnel server.
pub const DEFAULT_PORT: u16 = 7655;
