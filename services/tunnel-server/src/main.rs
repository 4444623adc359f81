//! dcnet-server
//!
//! Usage: `dcnet-server [DNSMASQ_CONF]`
//!
//! Must run as root: every connection creates a TAP interface and starts a
//! DHCP helper before dropping to the unprivileged account.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use dcnet_server::dhcp::DEFAULT_DHCP_CONFIG;
use dcnet_server::{logging, Config, DhcpHelperConfig, Listener, SystemHost};

/// DCNet broadband adapter tunnel server.
#[derive(Debug, Parser)]
#[command(name = "dcnet-server", version, about)]
struct Cli {
    /// DHCP helper configuration file.
    #[arg(value_name = "DNSMASQ_CONF", default_value = DEFAULT_DHCP_CONFIG)]
    dhcp_config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    // Prefer RUST_LOG, fall back to DCNET_LOG_LEVEL
    logging::init(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %config.listen_addr,
        address_base = %config.address_plan.base(),
        max_connections = config.address_plan.max_connections(),
        idle_timeout_secs = config.idle_timeout.map(|d| d.as_secs()),
        dhcp_config = %cli.dhcp_config.display(),
        "Starting dcnet-server"
    );

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dcnet-server failed");
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<()> {
    let host = SystemHost::new(
        DhcpHelperConfig::new(&config.dhcp_helper, cli.dhcp_config),
        config.run_as.clone(),
    );
    let settings = config.connection_settings();

    let listener = Listener::bind(config.listen_addr)?;
    listener.run(&host, &settings)
}
