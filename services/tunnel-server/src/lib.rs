//! DCNet tunnel server.
//!
//! Accepts adapter connections on TCP port 7655 and bridges each one onto a
//! dedicated TAP interface:
//! - Validates the client handshake
//! - Creates and addresses a `tapN` interface from the /31 address plan
//! - Starts a DHCP helper leasing the peer address
//! - Drops root privileges
//! - Relays frames until either side closes or the socket goes idle

pub mod config;
pub mod connection;
pub mod dhcp;
pub mod error;
pub mod host;
pub mod listener;
pub mod logging;
pub mod privilege;

pub use config::Config;
pub use connection::{
    handle_connection, run_in_child, ConnectionSettings, ConnectionState, ConnectionSummary,
};
pub use dhcp::{DhcpError, DhcpHelperConfig, HelperHandle};
pub use error::ConnectionError;
pub use host::{Host, ProvisionedInterface, SystemHost};
pub use listener::Listener;
pub use privilege::PrivilegeError;
