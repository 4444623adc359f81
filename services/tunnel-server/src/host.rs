//! Host operations performed on behalf of a connection.
//!
//! Connection handling reaches the kernel only through [`Host`], which keeps
//! the ordering of privileged steps (create, configure, start helper, drop
//! privileges) observable with a recording implementation in tests.

use std::os::fd::{AsRawFd, RawFd};

use dcnet_networking::{AddressPair, ControlSocket, NetworkError, TapDevice};
use dcnet_relay::RelayIo;
use tokio::io::unix::AsyncFd;
use tracing::warn;

use crate::dhcp::{self, DhcpHelperConfig, HelperHandle};
use crate::privilege::{self, PrivilegeError};

/// A freshly created interface and the name the kernel gave it.
#[derive(Debug)]
pub struct ProvisionedInterface<I> {
    pub handle: I,
    pub name: String,
}

/// Privileged host operations.
pub trait Host {
    /// Interface endpoint handed to the relay.
    type Interface: RelayIo + AsRawFd;

    /// Create a new interface with a kernel-assigned name.
    fn create_interface(&self) -> Result<ProvisionedInterface<Self::Interface>, NetworkError>;

    /// Assign the server address, netmask and up flag.
    fn configure_interface(&self, name: &str, pair: &AddressPair) -> Result<(), NetworkError>;

    /// Start the DHCP helper for the interface. `None` when it could not be
    /// started; the connection carries on without one.
    fn start_helper(
        &self,
        name: &str,
        pair: &AddressPair,
        inherited: &[RawFd],
    ) -> Option<HelperHandle>;

    /// Switch to the unprivileged account.
    fn drop_privileges(&self) -> Result<(), PrivilegeError>;
}

/// The real host: TAP devices, ioctls, forked supervisor, setuid.
#[derive(Debug, Clone)]
pub struct SystemHost {
    dhcp: DhcpHelperConfig,
    run_as: String,
}

impl SystemHost {
    pub fn new(dhcp: DhcpHelperConfig, run_as: impl Into<String>) -> Self {
        Self {
            dhcp,
            run_as: run_as.into(),
        }
    }
}

impl Host for SystemHost {
    type Interface = AsyncFd<TapDevice>;

    fn create_interface(&self) -> Result<ProvisionedInterface<Self::Interface>, NetworkError> {
        let tap = TapDevice::create()?;
        let name = tap.name().to_string();

        let handle = AsyncFd::new(tap).map_err(|source| NetworkError::Provisioning {
            op: "register",
            interface: name.clone(),
            source,
        })?;

        Ok(ProvisionedInterface { handle, name })
    }

    fn configure_interface(&self, name: &str, pair: &AddressPair) -> Result<(), NetworkError> {
        ControlSocket::open()?.configure(name, pair)
    }

    fn start_helper(
        &self,
        name: &str,
        pair: &AddressPair,
        inherited: &[RawFd],
    ) -> Option<HelperHandle> {
        match dhcp::start(&self.dhcp, name, pair, inherited) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(tap = %name, error = %e, "Continuing without DHCP helper");
                None
            }
        }
    }

    fn drop_privileges(&self) -> Result<(), PrivilegeError> {
        privilege::drop_privileges(&self.run_as).map(|_| ())
    }
}
