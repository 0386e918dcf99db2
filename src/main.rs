//! Relayhub - single-room TCP broadcast hub
//!
//! Accepts TCP connections, reads newline-delimited text from each, and
//! rebroadcasts every message - framed with the sender's address - to
//! every other connected peer.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relayhub::{config::ConfigManager, ConnectionManager, ShutdownCoordinator};

/// CLI arguments for Relayhub
#[derive(Parser, Debug)]
#[command(name = "relayhub")]
#[command(about = "Relayhub - single-room TCP broadcast hub")]
#[command(version)]
#[command(long_about = "
Relayhub - single-room TCP broadcast hub

Reads newline-delimited text from every connected peer and rebroadcasts
each message, framed with the sender's address, to every other peer.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RELAYHUB_BIND_ADDR            - Bind address (e.g., 0.0.0.0:7000)
  RELAYHUB_MAX_CONNECTIONS      - Maximum concurrent connections
  RELAYHUB_MAX_PAYLOAD_SIZE     - Maximum payload bytes per frame
  RELAYHUB_OUTBOUND_QUEUE_DEPTH - Frames buffered per peer
  RELAYHUB_SHUTDOWN_TIMEOUT     - Graceful shutdown bound (e.g., 30s)
  RELAYHUB_LOG_LEVEL            - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:7000)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Maximum payload bytes per broadcast frame
    #[arg(long, help = "Maximum payload bytes per broadcast frame")]
    pub max_payload_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting Relayhub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.max_payload_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Max payload size: {} bytes", config.server.max_payload_size);
        info!(
            "  Outbound queue depth: {} frames",
            config.server.outbound_queue_depth
        );
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Bind address: {}", config.server.bind_addr);
    info!("Max connections: {}", config.server.max_connections);
    info!("Max payload size: {} bytes", config.server.max_payload_size);

    let shutdown_coordinator = ShutdownCoordinator::new();

    let mut connection_manager = ConnectionManager::new(Arc::new(config));

    // Fatal startup errors abort with a distinct exit code before the
    // accept loop ever runs.
    if let Err(e) = connection_manager.prepare() {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }

    // Channel to hand the shutdown signal over to the server task
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let server_handle = tokio::spawn(async move {
        let manager = connection_manager;

        tokio::select! {
            result = manager.run() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_rx => {
                info!("Server task received shutdown signal");
                manager.initiate_shutdown();
                if let Err(e) = manager.wait_for_connections_to_close().await {
                    error!("Error during connection cleanup: {}", e);
                }
            }
        }
    });

    info!("Relayhub started; press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    let signal_result = shutdown_coordinator.listen_for_signals().await;
    if let Err(e) = signal_result {
        error!("Error setting up signal handlers: {}", e);
    }

    info!("Initiating graceful shutdown...");

    if shutdown_tx.send(()).is_err() {
        warn!("Failed to send shutdown signal to server task");
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
