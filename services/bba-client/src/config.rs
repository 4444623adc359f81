//! Client configuration.

use anyhow::{Context, Result};
use dcnet_proto::DEFAULT_PORT;

/// Default tunnel server.
pub const DEFAULT_HOST: &str = "dcnet.flyca.st";

/// Client configuration (env-driven).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tunnel server host name or address.
    pub host: String,

    /// Tunnel server port.
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("DCNET_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port: u16 = lookup("DCNET_PORT")
            .map(|v| v.trim().parse())
            .transpose()
            .context("DCNET_PORT must be a port number.")?
            .unwrap_or(DEFAULT_PORT);

        let log_level = lookup("DCNET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            host,
            port,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.host, "dcnet.flyca.st");
        assert_eq!(config.port, 7655);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(|key| match key {
            "DCNET_HOST" => Some("127.0.0.1".to_string()),
            "DCNET_PORT" => Some("17655".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 17655);
    }

    #[test]
    fn test_bad_port() {
        let err = Config::from_lookup(|key| (key == "DCNET_PORT").then(|| "70000".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DCNET_PORT"));
    }
}
