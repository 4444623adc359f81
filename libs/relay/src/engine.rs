//! Relay loop.
//!
//! Interest per iteration:
//! - interface readable only while the outbound buffer is empty
//! - socket readable while the inbound buffer has spare capacity
//! - interface writable while the inbound buffer holds a complete frame
//! - socket writable while the outbound buffer is non-empty
//!
//! After every successful read the loop immediately tries to push the data
//! on to the other endpoint, so a frame usually crosses in one iteration.

use std::fmt;
use std::io;
use std::time::Duration;

use dcnet_proto::{encode_header, is_filtered_multicast, try_decode_frame, ProtoError, HEADER_LEN};
use thiserror::Error;
use tokio::io::{Interest, Ready};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::buffer::FrameBuffer;
use crate::io::{is_transient, RelayIo};

/// Idle window for server connections (35 minutes without socket reads).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(35 * 60);

/// Relay behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// End the relay when the socket has been silent this long.
    pub idle_timeout: Option<Duration>,
    /// Drop multicast (but not broadcast) frames read from the interface.
    pub filter_multicast: bool,
}

impl RelayConfig {
    /// Server side: idle timeout and multicast filtering.
    pub fn server() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            filter_multicast: true,
        }
    }

    /// Client side: no idle timeout, every frame forwarded.
    pub fn client() -> Self {
        Self {
            idle_timeout: None,
            filter_multicast: false,
        }
    }

    /// Override the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Which endpoint an event or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Socket,
    Interface,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Socket => f.write_str("socket"),
            Side::Interface => f.write_str("interface"),
        }
    }
}

/// Why a relay ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// An endpoint reported end of stream.
    PeerClosed(Side),
    /// No socket data arrived within the idle window.
    IdleTimeout,
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::PeerClosed(side) => write!(f, "{} closed", side),
            RelayOutcome::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Non-transient I/O failure on one endpoint.
    #[error("{side} I/O failed: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// The peer sent something that is not a valid frame stream.
    #[error(transparent)]
    Protocol(#[from] ProtoError),
}

impl RelayError {
    fn io(side: Side, source: io::Error) -> Self {
        RelayError::Io { side, source }
    }
}

/// What the relay is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for readiness or the idle deadline.
    Idle,
    /// Reading from an endpoint.
    Readable,
    /// Writing buffered data to an endpoint.
    Draining,
    /// The loop has ended.
    Closed,
}

/// Traffic counters for one relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Frames written to the interface.
    pub frames_to_interface: u64,
    /// Payload bytes written to the interface.
    pub bytes_to_interface: u64,
    /// Frames read from the interface and queued for the socket.
    pub frames_to_socket: u64,
    /// Bytes (headers included) written to the socket.
    pub bytes_to_socket: u64,
    /// Interface frames dropped by the multicast filter.
    pub multicast_dropped: u64,
    /// Interface writes that accepted fewer bytes than the frame held.
    pub truncated_writes: u64,
    /// Zero-length frames received from the socket.
    pub empty_frames: u64,
}

enum Event {
    Socket(io::Result<Ready>),
    Interface(io::Result<Ready>),
    IdleDeadline,
}

/// Bidirectional relay between a tunnel socket and an interface.
pub struct Relay<'a, S, I> {
    socket: &'a S,
    interface: &'a I,
    config: RelayConfig,
    inbound: FrameBuffer,
    outbound: FrameBuffer,
    last_socket_activity: Instant,
    state: RelayState,
    stats: RelayStats,
}

impl<'a, S, I> Relay<'a, S, I>
where
    S: RelayIo,
    I: RelayIo,
{
    pub fn new(socket: &'a S, interface: &'a I, config: RelayConfig) -> Self {
        Self {
            socket,
            interface,
            config,
            inbound: FrameBuffer::new(),
            outbound: FrameBuffer::new(),
            last_socket_activity: Instant::now(),
            state: RelayState::Idle,
            stats: RelayStats::default(),
        }
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Run until an endpoint closes, the idle window elapses, or an error.
    pub async fn run(&mut self) -> Result<RelayOutcome, RelayError> {
        self.last_socket_activity = Instant::now();

        let result = self.run_loop().await;
        self.state = RelayState::Closed;

        debug!(
            frames_to_interface = self.stats.frames_to_interface,
            frames_to_socket = self.stats.frames_to_socket,
            multicast_dropped = self.stats.multicast_dropped,
            "Relay finished"
        );
        result
    }

    async fn run_loop(&mut self) -> Result<RelayOutcome, RelayError> {
        let socket = self.socket;
        let interface = self.interface;

        loop {
            self.state = RelayState::Idle;

            let socket_interest = self.socket_interest();
            let interface_interest = self.interface_interest();
            let deadline = self
                .config
                .idle_timeout
                .map(|idle| self.last_socket_activity + idle);

            let event = tokio::select! {
                ready = socket.ready(socket_interest.unwrap_or(Interest::READABLE)),
                    if socket_interest.is_some() => Event::Socket(ready),
                ready = interface.ready(interface_interest.unwrap_or(Interest::READABLE)),
                    if interface_interest.is_some() => Event::Interface(ready),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Event::IdleDeadline,
            };

            let closed = match event {
                Event::Socket(ready) => {
                    let ready = ready.map_err(|e| RelayError::io(Side::Socket, e))?;
                    self.on_socket_ready(ready)?
                }
                Event::Interface(ready) => {
                    let ready = ready.map_err(|e| RelayError::io(Side::Interface, e))?;
                    self.on_interface_ready(ready)?
                }
                Event::IdleDeadline => {
                    debug!(
                        idle_secs = self.config.idle_timeout.map(|d| d.as_secs()),
                        "Socket idle window elapsed"
                    );
                    return Ok(RelayOutcome::IdleTimeout);
                }
            };

            if let Some(side) = closed {
                return Ok(RelayOutcome::PeerClosed(side));
            }
        }
    }

    fn socket_interest(&self) -> Option<Interest> {
        let read = self.inbound.has_spare().then_some(Interest::READABLE);
        let write = (!self.outbound.is_empty()).then_some(Interest::WRITABLE);
        merge(read, write)
    }

    fn interface_interest(&self) -> Option<Interest> {
        let read = self.outbound.is_empty().then_some(Interest::READABLE);
        let write = matches!(try_decode_frame(self.inbound.filled()), Ok(Some(_)))
            .then_some(Interest::WRITABLE);
        merge(read, write)
    }

    fn on_socket_ready(&mut self, ready: Ready) -> Result<Option<Side>, RelayError> {
        if ready.is_readable() && self.inbound.has_spare() {
            self.state = RelayState::Readable;
            match self.socket.try_read(self.inbound.spare_mut()) {
                Ok(0) => return Ok(Some(Side::Socket)),
                Ok(n) => {
                    self.inbound.commit(n);
                    self.last_socket_activity = Instant::now();
                    trace!(bytes = n, buffered = self.inbound.len(), "Socket read");
                    self.drain_inbound()?;
                }
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(RelayError::io(Side::Socket, e)),
            }
        }

        if ready.is_writable() && !self.outbound.is_empty() {
            self.drain_outbound()?;
        }

        Ok(None)
    }

    fn on_interface_ready(&mut self, ready: Ready) -> Result<Option<Side>, RelayError> {
        if ready.is_readable() && self.outbound.is_empty() {
            self.state = RelayState::Readable;
            if self.read_interface()? {
                return Ok(Some(Side::Interface));
            }
            if !self.outbound.is_empty() {
                self.drain_outbound()?;
            }
        }

        if ready.is_writable() {
            self.drain_inbound()?;
        }

        Ok(None)
    }

    /// Read one frame into the outbound buffer. Returns true on end of stream.
    fn read_interface(&mut self) -> Result<bool, RelayError> {
        let raw = self.outbound.raw_mut();
        let n = match self.interface.try_read(&mut raw[HEADER_LEN..]) {
            Ok(0) => return Ok(true),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(false),
            Err(e) => return Err(RelayError::io(Side::Interface, e)),
        };

        let frame = &raw[HEADER_LEN..HEADER_LEN + n];
        if self.config.filter_multicast && is_filtered_multicast(frame) {
            self.stats.multicast_dropped += 1;
            trace!(bytes = n, "Dropped multicast frame");
            return Ok(false);
        }

        raw[..HEADER_LEN].copy_from_slice(&encode_header(n)?);
        self.outbound.set_len(HEADER_LEN + n);
        self.stats.frames_to_socket += 1;
        trace!(bytes = n, "Interface frame queued");
        Ok(false)
    }

    /// Write as much of the outbound frame to the socket as it accepts.
    fn drain_outbound(&mut self) -> Result<(), RelayError> {
        self.state = RelayState::Draining;
        while !self.outbound.is_empty() {
            match self.socket.try_write(self.outbound.filled()) {
                Ok(0) => {
                    return Err(RelayError::io(
                        Side::Socket,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ))
                }
                Ok(n) => {
                    self.outbound.consume(n);
                    self.stats.bytes_to_socket += n as u64;
                }
                Err(e) if is_transient(&e) => break,
                Err(e) => return Err(RelayError::io(Side::Socket, e)),
            }
        }
        Ok(())
    }

    /// Write every complete inbound frame to the interface.
    fn drain_inbound(&mut self) -> Result<(), RelayError> {
        self.state = RelayState::Draining;
        while let Some(frame) = try_decode_frame(self.inbound.filled())? {
            let consumed = frame.consumed;
            let len = frame.payload.len();

            if len == 0 {
                self.stats.empty_frames += 1;
                self.inbound.consume(consumed);
                continue;
            }

            match self.interface.try_write(frame.payload) {
                Ok(written) => {
                    if written < len {
                        self.stats.truncated_writes += 1;
                        warn!(
                            written,
                            frame_len = len,
                            "Short write to interface, rest of frame discarded"
                        );
                    }
                    self.stats.frames_to_interface += 1;
                    self.stats.bytes_to_interface += written as u64;
                    self.inbound.consume(consumed);
                }
                Err(e) if is_transient(&e) => break,
                Err(e) => return Err(RelayError::io(Side::Interface, e)),
            }
        }
        Ok(())
    }
}

fn merge(a: Option<Interest>, b: Option<Interest>) -> Option<Interest> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a | b),
        (a, b) => a.or(b),
    }
}
