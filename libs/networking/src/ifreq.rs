//! `struct ifreq` layouts used with interface ioctls.
//!
//! The kernel union following `ifr_name` is 24 bytes on Linux; each variant
//! here carries only the member it needs and pads up to that size.

use std::mem::size_of;
use std::net::Ipv4Addr;

use crate::NetworkError;

pub(crate) const IFNAMSIZ: usize = libc::IFNAMSIZ;
const IFR_UNION_LEN: usize = 24;

#[repr(C)]
pub(crate) struct IfReqFlags {
    pub name: [libc::c_char; IFNAMSIZ],
    pub flags: libc::c_short,
    _pad: [u8; IFR_UNION_LEN - size_of::<libc::c_short>()],
}

impl IfReqFlags {
    pub fn new(name: &str, flags: libc::c_short) -> Result<Self, NetworkError> {
        Ok(Self {
            name: encode_name(name)?,
            flags,
            _pad: [0; IFR_UNION_LEN - size_of::<libc::c_short>()],
        })
    }

    pub fn name(&self) -> String {
        decode_name(&self.name)
    }
}

#[repr(C)]
pub(crate) struct IfReqAddr {
    pub name: [libc::c_char; IFNAMSIZ],
    pub addr: libc::sockaddr,
    _pad: [u8; IFR_UNION_LEN - size_of::<libc::sockaddr>()],
}

impl IfReqAddr {
    pub fn new(name: &str, addr: Ipv4Addr) -> Result<Self, NetworkError> {
        Ok(Self {
            name: encode_name(name)?,
            addr: sockaddr_from_ipv4(addr),
            _pad: [0; IFR_UNION_LEN - size_of::<libc::sockaddr>()],
        })
    }
}

/// Encode an interface name into a NUL-terminated `ifr_name`.
///
/// An empty name asks the kernel to pick one.
pub(crate) fn encode_name(name: &str) -> Result<[libc::c_char; IFNAMSIZ], NetworkError> {
    let bytes = name.as_bytes();
    if bytes.len() >= IFNAMSIZ || bytes.contains(&0) {
        return Err(NetworkError::InvalidInterfaceName(name.to_string()));
    }

    let mut out = [0 as libc::c_char; IFNAMSIZ];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(out)
}

pub(crate) fn decode_name(raw: &[libc::c_char; IFNAMSIZ]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn sockaddr_from_ipv4(ip: Ipv4Addr) -> libc::sockaddr {
    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(ip.octets()),
        },
        sin_zero: [0; 8],
    };
    // SAFETY: sockaddr_in and sockaddr are both 16 bytes and sockaddr_in is
    // the AF_INET view of sockaddr.
    unsafe { std::mem::transmute::<libc::sockaddr_in, libc::sockaddr>(addr) }
}
