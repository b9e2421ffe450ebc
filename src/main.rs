//! wsrelay - WebSocket Fan-Out Relay Server
//!
//! Forwards every message received from WebSocket clients on the input port
//! to all WebSocket clients connected to the output port. Configuring both
//! ports identically switches to echo mode: messages are delivered to every
//! other client on the same port, never back to the sender.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsrelay::{
    config::ConfigManager, metrics::Metrics, ConnectionManager, RelayMode, ShutdownCoordinator,
};

/// CLI arguments for wsrelay
#[derive(Parser, Debug)]
#[command(name = "wsrelay")]
#[command(about = "wsrelay - WebSocket fan-out relay server")]
#[command(version)]
#[command(long_about = "
wsrelay - WebSocket fan-out relay server

Accepts WebSocket connections on two ports and forwards every message
received on the input port to all clients connected to the output port.
Configuring the same port for input and output echoes messages to every
other client on that port instead.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Built-in defaults

Examples:
  wsrelay --port-in 8080 --port-out 8081   Forward messages from port 8080 to 8081
  wsrelay -i 3000 -o 3000                  Echo messages on the same port 3000
")]
pub struct CliArgs {
    /// Input port to receive WebSocket messages
    #[arg(
        short = 'i',
        long,
        help = "Input port to receive WebSocket messages (default 8080)"
    )]
    pub port_in: Option<u16>,

    /// Output port to forward WebSocket messages
    #[arg(
        short = 'o',
        long,
        help = "Output port to forward WebSocket messages (default 8081)"
    )]
    pub port_out: Option<u16>,

    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind host for both listeners (overrides config file)
    #[arg(long, help = "Bind host for both listeners (e.g. 127.0.0.1)")]
    pub bind: Option<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting wsrelay v{} - WebSocket fan-out relay server",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > defaults
    let mut config = ConfigManager::load_from_file(&args.config)?;
    config.merge_with_cli_args(args.port_in, args.port_out, args.bind);

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    let mode = RelayMode::resolve(config.server.port_in, config.server.port_out);

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind host: {}", config.server.bind_host);
        info!("  Input port: {}", config.server.port_in);
        info!("  Output port: {}", config.server.port_out);
        info!("  Relay mode: {}", mode);
        info!("  Handshake timeout: {:?}", config.server.handshake_timeout);
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        return Ok(());
    }

    info!("Input port: {}", config.server.port_in);
    info!("Output port: {}", config.server.port_out);
    info!("Relay mode: {}", mode);

    // Create shutdown coordinator
    let shutdown_timeout = config.server.shutdown_timeout;
    let shutdown_coordinator = ShutdownCoordinator::new(shutdown_timeout);

    // Create metrics
    let metrics = Arc::new(Metrics::new());

    // Create the connection manager and bind its listeners; a bind failure
    // is fatal and exits non-zero before any connection is accepted.
    let config_arc = Arc::new(config);
    let mut connection_manager = ConnectionManager::new(Arc::clone(&config_arc), metrics);
    connection_manager.bind().await?;

    match mode {
        RelayMode::SeparateGroups => {
            if let Some(addr) = connection_manager.source_addr() {
                info!("Connect input clients to:  ws://{}", addr);
            }
            if let Some(addr) = connection_manager.target_addr() {
                info!("Connect output clients to: ws://{}", addr);
            }
        }
        RelayMode::SharedGroup => {
            if let Some(addr) = connection_manager.source_addr() {
                info!("Connect clients to: ws://{}", addr);
            }
            info!("Same port mode: messages will be echoed to other clients on the same port");
        }
    }

    // Create a channel to communicate with the server task
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    // Start the server in a separate task
    let server_handle = tokio::spawn(async move {
        let mut manager = connection_manager;

        tokio::select! {
            result = manager.run() => {
                if let Err(e) = result {
                    error!("Server error: {:#}", e);
                }
            }
            _ = shutdown_rx => {
                info!("Server task received shutdown signal");
                manager.initiate_shutdown();
                if let Err(e) = manager.wait_for_connections_to_close().await {
                    error!("Error during connection drain: {:#}", e);
                }
            }
        }
    });

    info!("wsrelay started successfully, ready to forward messages");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Block until an interrupt or terminate signal arrives
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    // Initiate graceful shutdown
    info!("Initiating graceful shutdown...");

    if shutdown_tx.send(()).is_err() {
        warn!("Failed to send shutdown signal to server task");
    }

    // Wait for server task to complete
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
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
