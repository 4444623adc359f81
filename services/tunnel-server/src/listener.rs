//! Tunnel listener.
//!
//! The listener is a plain blocking accept loop that hands each connection
//! to a forked process. Privilege drops are process-wide, so every
//! connection needs a process of its own; the listener itself keeps root to
//! provision the next one.

use std::net::{SocketAddr, TcpListener};

use anyhow::{Context, Result};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{fork, ForkResult};
use tracing::{debug, error, info};

use crate::connection::{run_in_child, ConnectionSettings, ConnectionState};
use crate::host::Host;

/// Statistics for the listener.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ListenerStats {
    /// Connections accepted.
    connections_accepted: u64,
    /// Connections handed to a child process.
    connections_dispatched: u64,
    /// Connections dropped because the fork failed.
    fork_failures: u64,
}

/// Blocking accept loop dispatching to forked connection processes.
pub struct Listener {
    inner: TcpListener,
    stats: ListenerStats,
}

impl Listener {
    /// Bind the listening socket. `SO_REUSEADDR` is set by the standard
    /// library on Unix.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .with_context(|| format!("failed to bind tunnel listener on {}", addr))?;

        Ok(Self {
            inner,
            stats: ListenerStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner
            .local_addr()
            .context("failed to read listener address")
    }

    /// Accept forever. Only an accept failure returns.
    pub fn run<H: Host>(mut self, host: &H, settings: &ConnectionSettings) -> Result<()> {
        ignore_child_exits()?;

        info!(
            addr = %self.local_addr()?,
            state = %ConnectionState::Listening,
            "Tunnel listener ready"
        );

        loop {
            let (stream, peer) = match self.inner.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(
                        accepted = self.stats.connections_accepted,
                        dispatched = self.stats.connections_dispatched,
                        fork_failures = self.stats.fork_failures,
                        "Tunnel listener stopping"
                    );
                    return Err(e).context("failed to accept tunnel connection");
                }
            };
            self.stats.connections_accepted += 1;

            // SAFETY: the listener is single-threaded and holds no async
            // runtime; the child builds its own.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    drop(self);
                    let code = run_in_child(host, stream, peer, settings);
                    std::process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => {
                    self.stats.connections_dispatched += 1;
                    debug!(
                        peer = %peer,
                        pid = %child,
                        accepted = self.stats.connections_accepted,
                        dispatched = self.stats.connections_dispatched,
                        "Connection dispatched"
                    );
                    drop(stream);
                }
                Err(e) => {
                    self.stats.fork_failures += 1;
                    error!(
                        peer = %peer,
                        error = %e,
                        fork_failures = self.stats.fork_failures,
                        "Failed to fork connection process"
                    );
                    drop(stream);
                }
            }
        }
    }
}

/// Let the kernel reap finished connection processes.
fn ignore_child_exits() -> Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal(Signal::SIGCHLD, SigHandler::SigIgn) }
        .context("failed to ignore SIGCHLD")?;
    Ok(())
}
