//! Minimal Ethernet header inspection.
//!
//! The tunnel never parses frames beyond the destination MAC; this is only
//! used to keep link-local multicast chatter of the host interface off the
//! tunnel.

/// Length of a MAC address.
pub const MAC_LEN: usize = 6;

/// The broadcast MAC address.
pub const BROADCAST_MAC: [u8; MAC_LEN] = [0xff; MAC_LEN];

/// Destination MAC of a frame, if the frame is long enough to carry one.
pub fn destination_mac(frame: &[u8]) -> Option<[u8; MAC_LEN]> {
    frame.get(..MAC_LEN)?.try_into().ok()
}

/// Whether a frame is multicast (group bit set) but not broadcast.
///
/// Frames too short to carry a destination address are never filtered.
pub fn is_filtered_multicast(frame: &[u8]) -> bool {
    match destination_mac(frame) {
        Some(mac) => mac[0] & 0x01 == 0x01 && mac != BROADCAST_MAC,
        None => false,
    }
}
