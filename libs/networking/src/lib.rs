//! Host networking for DCNet tunnels.
//!
//! This library provides:
//! - The /31 address plan that maps `tapN` interfaces to address pairs
//! - TAP device creation and attachment through `/dev/net/tun`
//! - IPv4 interface configuration through a control socket

use std::io;

use thiserror::Error;

pub mod address;
mod control;
mod ifreq;
pub mod tap;

pub use address::{
    interface_index, AddressPair, AddressPlan, DEFAULT_ADDRESS_BASE, DEFAULT_MAX_CONNECTIONS,
    POINT_TO_POINT_NETMASK,
};
pub use control::ControlSocket;
pub use tap::TapDevice;

/// Networking errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Interface name cannot be passed to the kernel.
    #[error("invalid interface name: {0:?}")]
    InvalidInterfaceName(String),

    /// Interface name does not follow the `tap<N>` pattern.
    #[error("interface {0} is not a tapN interface")]
    UnknownInterface(String),

    /// The kernel assigned an index beyond the configured connection limit.
    #[error("too many connections: interface index {index} exceeds limit of {max}")]
    TooManyConnections { index: u32, max: u32 },

    /// Address pair for an index falls outside the IPv4 space.
    #[error("address plan overflow at interface index {0}")]
    AddressOverflow(u32),

    /// Address base is not aligned to a /31 boundary.
    #[error("invalid address base {0}: must be an even address")]
    InvalidBase(std::net::Ipv4Addr),

    /// Opening the TUN/TAP control device failed.
    #[error("failed to open /dev/net/tun: {0}")]
    Open(#[source] io::Error),

    /// A kernel request against an interface failed.
    #[error("{op} failed on {interface}: {source}")]
    Provisioning {
        op: &'static str,
        interface: String,
        #[source]
        source: io::Error,
    },
}

impl NetworkError {
    pub(crate) fn provisioning(op: &'static str, interface: &str, source: io::Error) -> Self {
        NetworkError::Provisioning {
            op,
            interface: interface.to_string(),
            source,
        }
    }
}
