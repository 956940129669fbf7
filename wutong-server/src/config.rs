//! Command-line and environment configuration.

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use wutong_core::provider::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use wutong_core::ControllerConfig;

/// Session server for WuTong Mountain.
#[derive(Parser, Debug, Clone)]
#[command(name = "wutong-server")]
#[command(about = "WuTong Mountain session server")]
#[command(version)]
pub struct ServerConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "WUTONG_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Claude model used for narration
    #[arg(long, env = "WUTONG_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Maximum tokens per narrative response
    #[arg(long, env = "WUTONG_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: usize,

    /// Seconds to wait on the narrative provider before failing an advance
    #[arg(long, env = "WUTONG_PROVIDER_TIMEOUT_SECS", default_value_t = 90)]
    pub provider_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_provider_timeout(Duration::from_secs(self.provider_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["wutong-server"]);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_flags() {
        let config = ServerConfig::parse_from([
            "wutong-server",
            "--port",
            "8080",
            "--host",
            "127.0.0.1",
            "--provider-timeout-secs",
            "5",
            "--json-logs",
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(
            config.controller_config().provider_timeout,
            Duration::from_secs(5)
        );
        assert!(config.json_logs);
    }
}
