//! Frame relay between a tunnel socket and a virtual interface.
//!
//! One [`Relay`] moves traffic in both directions on a single task:
//!
//! - socket -> interface: bytes are reassembled into length-prefixed frames
//!   and each complete payload is written to the interface as one frame
//! - interface -> socket: each frame read from the interface is prefixed with
//!   its length and written to the socket, at most one frame in flight
//!
//! Endpoints are anything implementing [`RelayIo`], which covers TCP and Unix
//! sockets as well as TAP devices registered with the reactor.

mod buffer;
mod engine;
mod io;

pub use engine::{
    Relay, RelayConfig, RelayError, RelayOutcome, RelayState, RelayStats, Side,
    DEFAULT_IDLE_TIMEOUT,
};
pub use io::RelayIo;
