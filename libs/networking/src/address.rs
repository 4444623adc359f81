//! Point-to-point address plan.
//!
//! Every tunnel interface `tapN` gets its own /31 taken from a contiguous
//! block starting at the plan base:
//!
//! ```text
//! tap0  -> 172.20.1.0 (server) / 172.20.1.1 (peer)
//! tap1  -> 172.20.1.2          / 172.20.1.3
//! tapN  -> base + 2N           / base + 2N + 1
//! ```
//!
//! The plan is pure arithmetic on the kernel-assigned interface name; no
//! allocation state is kept.

use std::fmt;
use std::net::Ipv4Addr;

use crate::NetworkError;

/// Default first address of the plan.
pub const DEFAULT_ADDRESS_BASE: Ipv4Addr = Ipv4Addr::new(172, 20, 1, 0);

/// Default number of concurrently provisioned tunnels.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 64;

/// Netmask applied to every tunnel interface (/31).
pub const POINT_TO_POINT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 254);

const INTERFACE_PREFIX: &str = "tap";

/// Addresses of one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPair {
    /// Address assigned to the host side of the interface.
    pub server: Ipv4Addr,
    /// Address handed to the remote adapter over DHCP.
    pub peer: Ipv4Addr,
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.server, self.peer)
    }
}

/// Maps interface indices to /31 address pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPlan {
    base: Ipv4Addr,
    max_connections: u32,
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            base: DEFAULT_ADDRESS_BASE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl AddressPlan {
    /// Create a plan. The base must be the first address of a /31.
    pub fn new(base: Ipv4Addr, max_connections: u32) -> Result<Self, NetworkError> {
        if u32::from(base) & 1 != 0 {
            return Err(NetworkError::InvalidBase(base));
        }

        Ok(Self {
            base,
            max_connections,
        })
    }

    /// First address of the plan.
    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    /// Highest number of tunnels the plan serves.
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Address pair for interface index `index`.
    pub fn pair_for_index(&self, index: u32) -> Result<AddressPair, NetworkError> {
        if index >= self.max_connections {
            return Err(NetworkError::TooManyConnections {
                index,
                max: self.max_connections,
            });
        }

        let server = index
            .checked_mul(2)
            .and_then(|offset| u32::from(self.base).checked_add(offset))
            .ok_or(NetworkError::AddressOverflow(index))?;
        let peer = server
            .checked_add(1)
            .ok_or(NetworkError::AddressOverflow(index))?;

        Ok(AddressPair {
            server: Ipv4Addr::from(server),
            peer: Ipv4Addr::from(peer),
        })
    }

    /// Address pair for a kernel-assigned interface name such as `tap3`.
    pub fn pair_for_interface(&self, name: &str) -> Result<AddressPair, NetworkError> {
        self.pair_for_index(interface_index(name)?)
    }
}

/// Parse the index out of a `tap<N>` interface name.
pub fn interface_index(name: &str) -> Result<u32, NetworkError> {
    let unknown = || NetworkError::UnknownInterface(name.to_string());

    let digits = name.strip_prefix(INTERFACE_PREFIX).ok_or_else(unknown)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unknown());
    }

    digits.parse().map_err(|_| unknown())
}
