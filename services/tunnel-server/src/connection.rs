//! Connection lifecycle.
//!
//! ```text
//! Accepted -> Handshaking -> Provisioning -> PrivilegeDropped -> Relaying
//!          -> Terminating -> Closed
//! ```
//!
//! A handshake failure ends the connection before any interface exists. Once
//! an interface exists, every exit path releases the socket, then the
//! interface, then signals the DHCP helper.

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use dcnet_networking::{AddressPair, AddressPlan};
use dcnet_proto::{read_handshake, DEFAULT_HANDSHAKE_TIMEOUT};
use dcnet_relay::{Relay, RelayConfig, RelayIo, RelayOutcome, RelayStats};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dhcp::HelperHandle;
use crate::error::ConnectionError;
use crate::host::{Host, ProvisionedInterface};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Accepted,
    Handshaking,
    Provisioning,
    PrivilegeDropped,
    Relaying,
    Terminating,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Listening => "listening",
            ConnectionState::Accepted => "accepted",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Provisioning => "provisioning",
            ConnectionState::PrivilegeDropped => "privilege_dropped",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Terminating => "terminating",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn enter(state: ConnectionState) {
    debug!(state = %state, "Connection state");
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub address_plan: AddressPlan,
    pub relay: RelayConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            address_plan: AddressPlan::default(),
            relay: RelayConfig::server(),
        }
    }
}

/// How a connection that relayed traffic ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub interface: String,
    pub pair: AddressPair,
    pub outcome: RelayOutcome,
    pub stats: RelayStats,
}

/// Resources owned by a provisioned connection.
///
/// Field order is teardown order.
struct TunnelConnection<S, I> {
    socket: S,
    interface: I,
    helper: Option<HelperHandle>,
}

impl<S, I> TunnelConnection<S, I> {
    fn teardown(self) {
        let TunnelConnection {
            socket,
            interface,
            helper,
        } = self;

        drop(socket);
        drop(interface);
        if let Some(helper) = helper {
            helper.signal();
        }
    }
}

/// Run one connection from handshake to teardown.
pub async fn handle_connection<H, S>(
    host: &H,
    mut socket: S,
    settings: &ConnectionSettings,
) -> Result<ConnectionSummary, ConnectionError>
where
    H: Host,
    S: RelayIo + AsyncRead + Unpin + AsRawFd,
{
    enter(ConnectionState::Handshaking);
    read_handshake(&mut socket, settings.handshake_timeout).await?;

    enter(ConnectionState::Provisioning);
    let ProvisionedInterface { handle, name } = host.create_interface()?;
    let mut conn = TunnelConnection {
        socket,
        interface: handle,
        helper: None,
    };

    // Validated before any configuration; an out-of-range interface goes
    // away with `conn`.
    let pair = settings.address_plan.pair_for_interface(&name)?;
    host.configure_interface(&name, &pair)?;

    let inherited: [RawFd; 2] = [conn.socket.as_raw_fd(), conn.interface.as_raw_fd()];
    conn.helper = host.start_helper(&name, &pair, &inherited);

    host.drop_privileges()?;
    enter(ConnectionState::PrivilegeDropped);

    info!(tap = %name, server = %pair.server, peer = %pair.peer, "Tunnel established");

    enter(ConnectionState::Relaying);
    let (result, stats) = {
        let mut relay = Relay::new(&conn.socket, &conn.interface, settings.relay.clone());
        let result = relay.run().await;
        (result, relay.stats().clone())
    };

    enter(ConnectionState::Terminating);
    conn.teardown();
    enter(ConnectionState::Closed);

    let outcome = result?;
    Ok(ConnectionSummary {
        interface: name,
        pair,
        outcome,
        stats,
    })
}

/// Body of a forked connection process. Returns the process exit code.
pub fn run_in_child<H: Host>(
    host: &H,
    stream: std::net::TcpStream,
    peer: SocketAddr,
    settings: &ConnectionSettings,
) -> i32 {
    let span = info_span!("connection", peer = %peer);
    let _guard = span.enter();
    enter(ConnectionState::Accepted);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Failed to build connection runtime");
            return 1;
        }
    };

    let result: Result<ConnectionSummary, ConnectionError> = runtime.block_on(
        async {
            stream.set_nonblocking(true)?;
            let socket = TcpStream::from_std(stream)?;
            handle_connection(host, socket, settings).await
        }
        .instrument(span.clone()),
    );

    match result {
        Ok(summary) => {
            info!(
                tap = %summary.interface,
                outcome = %summary.outcome,
                frames_to_interface = summary.stats.frames_to_interface,
                frames_to_socket = summary.stats.frames_to_socket,
                multicast_dropped = summary.stats.multicast_dropped,
                "Connection closed"
            );
            0
        }
        Err(e) => {
            warn!(reason = e.reason_code(), error = %e, "Connection failed");
            1
        }
    }
}
