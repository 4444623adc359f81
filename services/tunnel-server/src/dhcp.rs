//! DHCP helper supervision.
//!
//! Each connection gets its own DHCP server bound to its interface that
//! leases exactly the peer address. The helper is started from a forked
//! supervisor process that keeps root privileges after the connection
//! process drops them, so it can still terminate the helper:
//!
//! ```text
//! connection ──pipe(write end)──> supervisor ──spawn──> dnsmasq
//! ```
//!
//! The supervisor blocks reading the pipe. When the connection closes the
//! write end, or dies and the kernel closes it, the read returns and the
//! supervisor sends SIGTERM to the helper, reaps it, and exits.

use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::fd::{OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Command;

use dcnet_networking::AddressPair;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::{close, fork, pipe2, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default DHCP helper executable.
pub const DEFAULT_DHCP_HELPER: &str = "/usr/sbin/dnsmasq";

/// Default helper configuration file, relative to the working directory.
pub const DEFAULT_DHCP_CONFIG: &str = "dnsmasq.conf";

/// Errors starting the supervisor.
#[derive(Debug, Error)]
pub enum DhcpError {
    #[error("failed to create supervisor pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to fork supervisor: {0}")]
    Fork(#[source] nix::Error),
}

/// How to run the DHCP helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpHelperConfig {
    /// Helper executable.
    pub program: PathBuf,
    /// Configuration file passed with `--conf-file`.
    pub config_file: PathBuf,
}

impl DhcpHelperConfig {
    pub fn new(program: impl Into<PathBuf>, config_file: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_file: config_file.into(),
        }
    }

    /// Arguments scoping the helper to one interface and one lease.
    pub fn args(&self, interface: &str, pair: &AddressPair) -> Vec<OsString> {
        let mut conf = OsString::from("--conf-file=");
        conf.push(&self.config_file);

        vec![
            conf,
            OsString::from("--keep-in-foreground"),
            OsString::from(format!("--interface={}", interface)),
            OsString::from(format!("--dhcp-range={},{}", pair.peer, pair.peer)),
        ]
    }
}

impl Default for DhcpHelperConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DHCP_HELPER, DEFAULT_DHCP_CONFIG)
    }
}

/// Owner side of a running supervisor.
///
/// Dropping the handle (or calling [`HelperHandle::signal`]) closes the pipe,
/// which tells the supervisor to stop the helper.
#[derive(Debug)]
pub struct HelperHandle {
    pid: Pid,
    pipe: Option<OwnedFd>,
}

impl HelperHandle {
    /// Wrap a supervisor pid and the write end of its pipe.
    pub fn new(pid: Pid, pipe: OwnedFd) -> Self {
        Self {
            pid,
            pipe: Some(pipe),
        }
    }

    /// Supervisor process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Tell the supervisor to stop the helper.
    pub fn signal(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            drop(pipe);
            debug!(supervisor = %self.pid, "Signalled DHCP helper supervisor");
        }
    }
}

impl Drop for HelperHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fork a supervisor that runs the helper for `interface`.
///
/// `inherited` lists descriptors of the connection (socket, interface) that
/// the supervisor must close so it never keeps them alive.
pub fn start(
    config: &DhcpHelperConfig,
    interface: &str,
    pair: &AddressPair,
    inherited: &[RawFd],
) -> Result<HelperHandle, DhcpError> {
    let args = config.args(interface, pair);
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(DhcpError::Pipe)?;

    // SAFETY: the connection process is single-threaded; the child only
    // closes descriptors, spawns the helper and exits.
    match unsafe { fork() }.map_err(DhcpError::Fork)? {
        ForkResult::Parent { child } => {
            drop(read_end);
            info!(
                tap = %interface,
                lease = %pair.peer,
                supervisor = %child,
                "Started DHCP helper supervisor"
            );
            Ok(HelperHandle::new(child, write_end))
        }
        ForkResult::Child => {
            drop(write_end);
            let code = supervise(&config.program, &args, read_end, inherited);
            std::process::exit(code)
        }
    }
}

/// Supervisor body. Runs in the forked child and never returns to the
/// connection code.
fn supervise(program: &Path, args: &[OsString], pipe: OwnedFd, inherited: &[RawFd]) -> i32 {
    // SAFETY: restoring the default disposition installs no handler.
    if let Err(e) = unsafe { signal(Signal::SIGCHLD, SigHandler::SigDfl) } {
        error!(error = %e, "Failed to restore SIGCHLD disposition");
        return 1;
    }

    for fd in inherited {
        let _ = close(*fd);
    }

    let mut helper = match Command::new(program).args(args).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(program = %program.display(), error = %e, "Failed to spawn DHCP helper");
            return 1;
        }
    };

    // Data, EOF and errors all mean the owner is done.
    let mut byte = [0u8; 1];
    let _ = File::from(pipe).read(&mut byte);

    let helper_pid = Pid::from_raw(helper.id() as i32);
    if let Err(e) = kill(helper_pid, Signal::SIGTERM) {
        warn!(helper = %helper_pid, error = %e, "Failed to signal DHCP helper");
    }
    if let Err(e) = helper.wait() {
        warn!(helper = %helper_pid, error = %e, "Failed to reap DHCP helper");
    }

    0
}
