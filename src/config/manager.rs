//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::debug!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.handshake_timeout.as_millis() == 0 {
            bail!("handshake_timeout must be greater than 0");
        }

        if self.server.handshake_timeout.as_secs() > 300 {
            bail!("handshake_timeout cannot exceed 5 minutes");
        }

        if self.server.shutdown_timeout.as_secs() > 600 {
            bail!("shutdown_timeout cannot exceed 10 minutes");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments (highest priority)
    pub fn merge_with_cli_args(
        &mut self,
        port_in: Option<u16>,
        port_out: Option<u16>,
        bind_host: Option<IpAddr>,
    ) {
        if let Some(port) = port_in {
            self.server.port_in = port;
            tracing::info!("CLI override: input port set to {}", port);
        }

        if let Some(port) = port_out {
            self.server.port_out = port;
            tracing::info!("CLI override: output port set to {}", port);
        }

        if let Some(host) = bind_host {
            self.server.bind_host = host;
            tracing::info!("CLI override: bind host set to {}", host);
        }
    }

    /// True when source and target roles share a single port
    pub fn is_shared_port(&self) -> bool {
        self.server.port_in == self.server.port_out
    }
}
