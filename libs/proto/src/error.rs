//! Codec errors.

use thiserror::Error;

use crate::frame::MAX_PAYLOAD;

/// Errors raised while framing payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// A local caller tried to send a payload that cannot be framed.
    #[error("frame payload of {len} bytes exceeds maximum of {MAX_PAYLOAD}")]
    FrameTooLarge { len: usize },

    /// The peer declared a frame length no buffer can ever hold.
    #[error("peer declared a {declared}-byte frame, maximum is {MAX_PAYLOAD}")]
    ProtocolViolation { declared: usize },
}
