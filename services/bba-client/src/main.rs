//! DCNet broadband adapter bridge.
//!
//! Connects a local TAP interface to the DCNet tunnel server so an emulated
//! broadband adapter on that interface reaches the DCNet network.
//!
//! Environment:
//! - `DCNET_HOST`: tunnel server (default `dcnet.flyca.st`)
//! - `DCNET_PORT`: tunnel port (default 7655)
//! - `DCNET_LOG_LEVEL`: log level when `RUST_LOG` is unset

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

mod bridge;
mod config;
mod logging;

use config::Config;

/// Bridge version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "dcnet-bba", version, about = "Bridge a TAP interface to DCNet")]
struct Cli {
    /// TAP interface to bridge. It must already exist.
    #[arg(default_value = "tap0")]
    tap_interface: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::from(2);
        }
    };

    logging::init(&config.log_level);

    info!(
        version = VERSION,
        server = %config.host,
        port = config.port,
        tap = %cli.tap_interface,
        "DCNet BBA starting"
    );

    let code = match bridge::run(&config, &cli.tap_interface).await {
        Ok(outcome) => {
            info!(outcome = %outcome, "Bridge closed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Bridge failed");
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    };

    info!("DCNet BBA stopping");
    code
}
