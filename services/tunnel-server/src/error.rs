//! Per-connection error taxonomy.

use dcnet_networking::NetworkError;
use dcnet_proto::{HandshakeError, ProtoError};
use dcnet_relay::RelayError;
use thiserror::Error;

use crate::privilege::PrivilegeError;

/// Why a tunnel connection ended abnormally. Every variant stays local to
/// the connection process.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The client did not open with a valid handshake.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The kernel assigned an interface beyond the connection limit.
    #[error("too many connections: {0}")]
    TooManyConnections(#[source] NetworkError),

    /// Creating or configuring the interface failed.
    #[error("interface provisioning failed: {0}")]
    InterfaceProvisioning(#[source] NetworkError),

    /// Switching to the unprivileged user failed.
    #[error("privilege drop failed: {0}")]
    PrivilegeDrop(#[from] PrivilegeError),

    /// The relay loop failed.
    #[error("relay failed: {0}")]
    Relay(#[from] RelayError),

    /// Preparing the connection process itself failed.
    #[error("connection setup failed: {0}")]
    Setup(#[from] std::io::Error),
}

impl From<NetworkError> for ConnectionError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::TooManyConnections { .. } => ConnectionError::TooManyConnections(err),
            other => ConnectionError::InterfaceProvisioning(other),
        }
    }
}

impl ConnectionError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ConnectionError::Handshake(HandshakeError::Timeout(_)) => "handshake_timeout",
            ConnectionError::Handshake(HandshakeError::Mismatch { .. }) => "handshake_mismatch",
            ConnectionError::Handshake(HandshakeError::UnsupportedVersion(_)) => {
                "unsupported_version"
            }
            ConnectionError::Handshake(HandshakeError::Io(_)) => "handshake_io_error",
            ConnectionError::TooManyConnections(_) => "too_many_connections",
            ConnectionError::InterfaceProvisioning(_) => "interface_provisioning_failed",
            ConnectionError::PrivilegeDrop(_) => "privilege_drop_failed",
            ConnectionError::Relay(RelayError::Protocol(ProtoError::ProtocolViolation {
                ..
            })) => "protocol_violation",
            ConnectionError::Relay(RelayError::Protocol(ProtoError::FrameTooLarge { .. })) => {
                "frame_too_large"
            }
            ConnectionError::Relay(RelayError::Io { .. }) => "io_error",
            ConnectionError::Setup(_) => "setup_failed",
        }
    }
}
