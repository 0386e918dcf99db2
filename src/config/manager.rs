//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
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

            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("RELAYHUB_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid RELAYHUB_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("RELAYHUB_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAYHUB_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(payload_size) = std::env::var("RELAYHUB_MAX_PAYLOAD_SIZE") {
            config.server.max_payload_size = payload_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAYHUB_MAX_PAYLOAD_SIZE: {}", payload_size))?;
        }

        if let Ok(depth) = std::env::var("RELAYHUB_OUTBOUND_QUEUE_DEPTH") {
            config.server.outbound_queue_depth = depth
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAYHUB_OUTBOUND_QUEUE_DEPTH: {}", depth))?;
        }

        if let Ok(timeout) = std::env::var("RELAYHUB_SHUTDOWN_TIMEOUT") {
            config.server.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RELAYHUB_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("RELAYHUB_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.server.max_payload_size < 64 {
            bail!("max_payload_size must be at least 64 bytes");
        }

        if self.server.max_payload_size > 65536 {
            bail!("max_payload_size cannot exceed 64KB");
        }

        if self.server.outbound_queue_depth == 0 {
            bail!("outbound_queue_depth must be greater than 0");
        }

        if self.server.shutdown_timeout.as_secs() == 0 {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Validate logging configuration
    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            bail!(
                "logging.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        max_payload_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(payload_size) = max_payload_size {
            self.server.max_payload_size = payload_size;
            tracing::info!("CLI override: max payload size set to {} bytes", payload_size);
        }
    }
}
