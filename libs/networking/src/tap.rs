//! TAP device creation and attachment.
//!
//! Devices are opened through `/dev/net/tun` in non-blocking mode with
//! `IFF_TAP | IFF_NO_PI`, so every read returns exactly one Ethernet frame
//! with no packet-information prefix. Devices are not made persistent: the
//! kernel removes a server-created interface as soon as its last descriptor
//! is closed.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use tracing::{debug, info};

use crate::ifreq::IfReqFlags;
use crate::NetworkError;

const TUN_DEVICE: &str = "/dev/net/tun";
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// Handle to an open TAP interface.
#[derive(Debug)]
pub struct TapDevice {
    file: File,
    name: String,
}

impl TapDevice {
    /// Create a fresh interface and let the kernel name it (`tap0`, `tap1`, ...).
    pub fn create() -> Result<Self, NetworkError> {
        let tap = Self::open("")?;
        info!(tap = %tap.name, "Created TAP device");
        Ok(tap)
    }

    /// Attach to an existing interface by name, creating it if the caller
    /// has the privilege to do so.
    pub fn attach(name: &str) -> Result<Self, NetworkError> {
        let tap = Self::open(name)?;
        info!(tap = %tap.name, "Attached to TAP device");
        Ok(tap)
    }

    fn open(requested: &str) -> Result<Self, NetworkError> {
        let mut req = IfReqFlags::new(requested, IFF_TAP | IFF_NO_PI)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(TUN_DEVICE)
            .map_err(NetworkError::Open)?;

        // SAFETY: `req` is a properly sized ifreq that outlives the call, and
        // the kernel writes the assigned name back into it.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req) };
        if ret < 0 {
            let display = if requested.is_empty() { "tap*" } else { requested };
            return Err(NetworkError::provisioning(
                "TUNSETIFF",
                display,
                io::Error::last_os_error(),
            ));
        }

        Ok(Self {
            file,
            name: req.name(),
        })
    }

    /// Interface name as assigned by the kernel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one frame. Returns `WouldBlock` when none is queued.
    pub fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    /// Write one frame. A frame is accepted whole or not at all.
    pub fn write_frame(&self, frame: &[u8]) -> io::Result<usize> {
        (&self.file).write(frame)
    }
}

impl AsRawFd for TapDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for TapDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        debug!(tap = %self.name, "Releasing TAP device");
    }
}
