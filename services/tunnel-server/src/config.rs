//! Server configuration.
//!
//! Everything except the DHCP helper config file path (a positional CLI
//! argument) comes from `DCNET_*` environment variables.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dcnet_networking::{AddressPlan, DEFAULT_ADDRESS_BASE, DEFAULT_MAX_CONNECTIONS};
use dcnet_proto::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PORT};
use dcnet_relay::{RelayConfig, DEFAULT_IDLE_TIMEOUT};

use crate::connection::ConnectionSettings;
use crate::dhcp::DEFAULT_DHCP_HELPER;
use crate::privilege::DEFAULT_RUN_AS;

/// Server configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the tunnel listener binds to.
    pub listen_addr: SocketAddr,

    /// Interface-to-address mapping.
    pub address_plan: AddressPlan,

    /// Socket idle window; `None` disables the timeout.
    pub idle_timeout: Option<Duration>,

    /// Time a new connection has to send its handshake.
    pub handshake_timeout: Duration,

    /// DHCP helper executable.
    pub dhcp_helper: PathBuf,

    /// Unprivileged account connection processes switch to.
    pub run_as: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = parse_var(&lookup, "DCNET_LISTEN_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

        let base: Ipv4Addr =
            parse_var(&lookup, "DCNET_ADDRESS_BASE")?.unwrap_or(DEFAULT_ADDRESS_BASE);
        let max_connections: u32 =
            parse_var(&lookup, "DCNET_MAX_CONNECTIONS")?.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let address_plan = AddressPlan::new(base, max_connections)
            .context("DCNET_ADDRESS_BASE must be the first address of a /31.")?;

        // 0 disables the idle timeout
        let idle_timeout = match parse_var::<u64, _>(&lookup, "DCNET_IDLE_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_IDLE_TIMEOUT),
        };

        let handshake_timeout = parse_var::<u64, _>(&lookup, "DCNET_HANDSHAKE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT)
            .max(Duration::from_secs(1));

        let dhcp_helper = lookup("DCNET_DHCP_HELPER")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DHCP_HELPER));

        let run_as = lookup("DCNET_RUN_AS").unwrap_or_else(|| DEFAULT_RUN_AS.to_string());

        let log_level = lookup("DCNET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            address_plan,
            idle_timeout,
            handshake_timeout,
            dhcp_helper,
            run_as,
            log_level,
        })
    }

    /// Per-connection settings derived from this configuration.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            handshake_timeout: self.handshake_timeout,
            address_plan: self.address_plan,
            relay: RelayConfig::server().with_idle_timeout(self.idle_timeout),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{} has an invalid value.", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:7655".parse().unwrap());
        assert_eq!(config.address_plan, AddressPlan::default());
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(2100)));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.dhcp_helper, PathBuf::from("/usr/sbin/dnsmasq"));
        assert_eq!(config.run_as, "nobody");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DCNET_LISTEN_ADDR", "127.0.0.1:9000"),
            ("DCNET_ADDRESS_BASE", "10.9.0.0"),
            ("DCNET_MAX_CONNECTIONS", "8"),
            ("DCNET_IDLE_TIMEOUT_SECS", "0"),
            ("DCNET_HANDSHAKE_TIMEOUT_SECS", "10"),
            ("DCNET_RUN_AS", "dcnet"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.address_plan.base(), Ipv4Addr::new(10, 9, 0, 0));
        assert_eq!(config.address_plan.max_connections(), 8);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.run_as, "dcnet");

        let settings = config.connection_settings();
        assert_eq!(settings.relay.idle_timeout, None);
        assert!(settings.relay.filter_multicast);
    }

    #[test]
    fn test_rejects_odd_base() {
        let err = Config::from_lookup(lookup_from(&[("DCNET_ADDRESS_BASE", "10.9.0.1")]))
            .unwrap_err();
        assert!(err.to_string().contains("DCNET_ADDRESS_BASE"));
    }

    #[test]
    fn test_rejects_garbage_number() {
        let err = Config::from_lookup(lookup_from(&[("DCNET_MAX_CONNECTIONS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DCNET_MAX_CONNECTIONS"));
    }
}
