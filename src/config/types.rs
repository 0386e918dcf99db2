//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::relay::frame::DEFAULT_MAX_PAYLOAD;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the hub listens on
    pub bind_addr: SocketAddr,
    /// Maximum number of simultaneously connected peers
    pub max_connections: usize,
    /// Maximum payload bytes per broadcast frame; longer inbound payloads
    /// are truncated to this size
    pub max_payload_size: usize,
    /// Frames buffered per peer before the fire-and-forget policy starts
    /// dropping them
    pub outbound_queue_depth: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:7000".parse().unwrap(),
                max_connections: 1024,
                max_payload_size: DEFAULT_MAX_PAYLOAD,
                outbound_queue_depth: 64,
                shutdown_timeout: Duration::from_secs(30),
            },
            logging: LoggingConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
