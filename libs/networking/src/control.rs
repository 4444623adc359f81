//! IPv4 interface configuration through an `AF_INET` datagram socket.

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use tracing::debug;

use crate::address::{AddressPair, POINT_TO_POINT_NETMASK};
use crate::ifreq::{IfReqAddr, IfReqFlags};
use crate::NetworkError;

/// Socket used only as a handle for interface ioctls.
#[derive(Debug)]
pub struct ControlSocket {
    fd: OwnedFd,
}

impl ControlSocket {
    /// Open a control socket.
    pub fn open() -> Result<Self, NetworkError> {
        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|errno| NetworkError::Open(io::Error::from(errno)))?;

        Ok(Self { fd })
    }

    /// Assign the server address and /31 netmask, then bring the interface up.
    pub fn configure(&self, interface: &str, pair: &AddressPair) -> Result<(), NetworkError> {
        self.set_address(interface, pair.server)?;
        self.set_netmask(interface, POINT_TO_POINT_NETMASK)?;
        self.bring_up(interface)?;

        debug!(
            tap = %interface,
            server = %pair.server,
            peer = %pair.peer,
            "Interface configured"
        );
        Ok(())
    }

    /// Set the interface IPv4 address.
    pub fn set_address(&self, interface: &str, addr: Ipv4Addr) -> Result<(), NetworkError> {
        let req = IfReqAddr::new(interface, addr)?;
        self.ioctl(interface, "SIOCSIFADDR", libc::SIOCSIFADDR as _, &req)
    }

    /// Set the interface IPv4 netmask.
    pub fn set_netmask(&self, interface: &str, mask: Ipv4Addr) -> Result<(), NetworkError> {
        let req = IfReqAddr::new(interface, mask)?;
        self.ioctl(interface, "SIOCSIFNETMASK", libc::SIOCSIFNETMASK as _, &req)
    }

    /// Mark the interface up and running, keeping its other flags.
    pub fn bring_up(&self, interface: &str) -> Result<(), NetworkError> {
        let mut req = IfReqFlags::new(interface, 0)?;

        // SAFETY: `req` is a properly sized ifreq; the kernel fills in flags.
        let ret = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                libc::SIOCGIFFLAGS as _,
                &mut req as *mut IfReqFlags,
            )
        };
        if ret < 0 {
            return Err(NetworkError::provisioning(
                "SIOCGIFFLAGS",
                interface,
                io::Error::last_os_error(),
            ));
        }

        req.flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        self.ioctl(interface, "SIOCSIFFLAGS", libc::SIOCSIFFLAGS as _, &req)
    }

    fn ioctl<T>(
        &self,
        interface: &str,
        op: &'static str,
        request: libc::c_ulong,
        req: &T,
    ) -> Result<(), NetworkError> {
        // SAFETY: callers pass one of the ifreq layouts, which the kernel
        // reads for the duration of the call only.
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, req as *const T) };
        if ret < 0 {
            return Err(NetworkError::provisioning(
                op,
                interface,
                io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface_reports_op() {
        let Ok(control) = ControlSocket::open() else {
            return;
        };

        match control.set_netmask("dcnet-missing0", POINT_TO_POINT_NETMASK) {
            Err(NetworkError::Provisioning { op, interface, .. }) => {
                assert_eq!(op, "SIOCSIFNETMASK");
                assert_eq!(interface, "dcnet-missing0");
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }
    }
}
