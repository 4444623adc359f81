//! Client side of the tunnel.
//!
//! Connects to the tunnel server, announces itself, then relays frames
//! between the socket and a pre-existing TAP interface until either side
//! goes away. The client never times out idle connections and forwards
//! multicast in both directions.

use std::net::SocketAddr;

use anyhow::{anyhow, Context, Result};
use dcnet_networking::{ControlSocket, TapDevice};
use dcnet_proto::HANDSHAKE;
use dcnet_relay::{Relay, RelayConfig, RelayError, RelayIo, RelayOutcome};
use tokio::io::{unix::AsyncFd, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::config::Config;

/// Resolve `host` to its first IPv4 address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {}", host))?;

    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| anyhow!("{} has no IPv4 address", host))
}

/// Open the tunnel connection and send the handshake.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    stream
        .set_nodelay(true)
        .context("failed to set TCP_NODELAY")?;

    send_handshake(&mut stream)
        .await
        .context("failed to send handshake")?;

    debug!(server = %addr, "Handshake sent");
    Ok(stream)
}

pub async fn send_handshake<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&HANDSHAKE).await?;
    writer.flush().await
}

/// Attach to an existing TAP interface and mark it up.
pub fn open_interface(name: &str) -> Result<AsyncFd<TapDevice>> {
    let tap = TapDevice::attach(name)
        .with_context(|| format!("failed to attach to {}", name))?;

    ControlSocket::open()
        .and_then(|control| control.bring_up(name))
        .with_context(|| format!("failed to bring up {}", name))?;

    AsyncFd::new(tap).context("failed to register interface with the runtime")
}

/// Relay frames until one side closes.
pub async fn bridge<S, I>(socket: &S, interface: &I) -> Result<RelayOutcome, RelayError>
where
    S: RelayIo,
    I: RelayIo,
{
    let mut relay = Relay::new(socket, interface, RelayConfig::client());
    let result = relay.run().await;

    let stats = relay.stats();
    debug!(
        frames_to_interface = stats.frames_to_interface,
        frames_to_socket = stats.frames_to_socket,
        "Bridge finished"
    );
    result
}

/// Connect `interface` to the configured tunnel server.
pub async fn run(config: &Config, interface: &str) -> Result<RelayOutcome> {
    let addr = resolve(&config.host, config.port).await?;
    let socket = connect(addr).await?;
    let tap = open_interface(interface)?;

    info!(server = %addr, tap = %interface, "Bridge established");

    let outcome = bridge(&socket, &tap).await?;

    // Socket first, then the interface.
    drop(socket);
    drop(tap);
    Ok(outcome)
}
