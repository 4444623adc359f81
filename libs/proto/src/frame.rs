//! Length-prefixed Ethernet frame codec.
//!
//! Wire format:
//! - 2 bytes payload length, little-endian
//! - `length` bytes of raw Ethernet frame
//!
//! Both relay buffers are [`BUFFER_CAPACITY`] bytes, so the largest payload
//! that can ever be carried is the capacity minus the header.

use crate::error::ProtoError;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;

/// Capacity of each relay buffer (header included).
pub const BUFFER_CAPACITY: usize = 1600;

/// Largest payload a frame may carry (1598 bytes).
pub const MAX_PAYLOAD: usize = BUFFER_CAPACITY - HEADER_LEN;

/// A complete frame found at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    /// Ethernet frame bytes, without the length prefix.
    pub payload: &'a [u8],
    /// Bytes the frame occupies in the buffer (`HEADER_LEN + payload.len()`).
    pub consumed: usize,
}

/// Decode the frame at the front of `buf`, if it is complete.
///
/// Returns `Ok(None)` while the header or payload is still partial; the
/// caller keeps the bytes and retries once more data has arrived. A declared
/// length above [`MAX_PAYLOAD`] is rejected as soon as the header is visible,
/// since such a frame could never fit in a relay buffer.
pub fn try_decode_frame(buf: &[u8]) -> Result<Option<DecodedFrame<'_>>, ProtoError> {
    let Some(header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };

    let declared = u16::from_le_bytes([header[0], header[1]]) as usize;
    if declared > MAX_PAYLOAD {
        return Err(ProtoError::ProtocolViolation { declared });
    }

    let consumed = HEADER_LEN + declared;
    if buf.len() < consumed {
        return Ok(None);
    }

    Ok(Some(DecodedFrame {
        payload: &buf[HEADER_LEN..consumed],
        consumed,
    }))
}

/// Encode the length prefix for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_LEN], ProtoError> {
    if len > MAX_PAYLOAD {
        return Err(ProtoError::FrameTooLarge { len });
    }
    Ok((len as u16).to_le_bytes())
}

/// Encode a payload as a complete frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let header = encode_header(payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}
