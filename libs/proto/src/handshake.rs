//! Tunnel handshake.
//!
//! Protocol:
//! 1. Client connects to the server on TCP port 7655
//! 2. Client sends the 8-byte handshake `06 00 "DCNET" 01`
//! 3. Server validates it within a bounded wait, or closes the connection
//! 4. Both sides start exchanging frames; there is no reply
//!
//! The handshake is itself shaped like a frame: a little-endian length of 6
//! followed by the protocol identifier and version.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// Protocol identifier carried in the handshake.
pub const PROTOCOL_ID: &[u8; 5] = b"DCNET";

/// Protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Total handshake length on the wire.
pub const HANDSHAKE_LEN: usize = 8;

/// Length field value of the handshake (identifier + version).
const HANDSHAKE_BODY_LEN: u16 = (PROTOCOL_ID.len() + 1) as u16;

/// The handshake a client sends.
pub const HANDSHAKE: [u8; HANDSHAKE_LEN] = [
    HANDSHAKE_BODY_LEN as u8,
    0,
    PROTOCOL_ID[0],
    PROTOCOL_ID[1],
    PROTOCOL_ID[2],
    PROTOCOL_ID[3],
    PROTOCOL_ID[4],
    PROTOCOL_VERSION,
];

/// How long a new connection may take to send its handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Handshake failures. Each one ends the connection before any interface
/// is provisioned.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The full handshake did not arrive in time.
    #[error("handshake not received within {0:?}")]
    Timeout(Duration),

    /// Length field or protocol identifier did not match, or the peer
    /// closed before sending all 8 bytes.
    #[error("invalid handshake: {}", Hex(.received))]
    Mismatch { received: Vec<u8> },

    /// Identifier matched but the version is not ours.
    #[error("unknown protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Socket error while reading.
    #[error("handshake read failed: {0}")]
    Io(#[from] io::Error),
}

/// Check a received handshake.
pub fn validate_handshake(received: &[u8; HANDSHAKE_LEN]) -> Result<(), HandshakeError> {
    let declared = u16::from_le_bytes([received[0], received[1]]);
    if declared != HANDSHAKE_BODY_LEN || &received[2..7] != PROTOCOL_ID {
        return Err(HandshakeError::Mismatch {
            received: received.to_vec(),
        });
    }

    match received[7] {
        PROTOCOL_VERSION => Ok(()),
        other => Err(HandshakeError::UnsupportedVersion(other)),
    }
}

/// Read and validate the handshake from a freshly accepted stream.
///
/// The wait only bounds this call; reads made afterwards on the same
/// stream have no deadline.
pub async fn read_handshake<R>(stream: &mut R, wait: Duration) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let received = timeout(wait, read_exactly(stream))
        .await
        .map_err(|_| HandshakeError::Timeout(wait))??;

    validate_handshake(&received)
}

/// Read exactly [`HANDSHAKE_LEN`] bytes, reporting what arrived on early EOF.
async fn read_exactly<R>(stream: &mut R) -> Result<[u8; HANDSHAKE_LEN], HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_LEN];
    let mut filled = 0;

    while filled < HANDSHAKE_LEN {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(HandshakeError::Mismatch {
                received: buf[..filled].to_vec(),
            });
        }
        filled += n;
    }

    Ok(buf)
}

/// Hex rendering for logging raw handshake bytes.
struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<empty>");
        }
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
