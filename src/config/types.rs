//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address both listeners bind to
    pub bind_host: IpAddr,
    /// Port accepting source clients (messages received here are relayed)
    pub port_in: u16,
    /// Port accepting target clients (relayed messages are delivered here)
    pub port_out: u16,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_host: IpAddr::from([0, 0, 0, 0]),
                port_in: 8080,
                port_out: 8081,
                handshake_timeout: Duration::from_secs(10),
                shutdown_timeout: Duration::from_secs(5),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
