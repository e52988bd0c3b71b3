// ABOUTME: Main entry point for skiff - platform-to-framework bridge adapter
// ABOUTME: Loads TOML config, wires the adapter, and runs until shutdown or fatal error

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use skiff::adapter::Adapter;
use skiff::platform::create_platform_client;
use skiff::ws::{self, WsTransport};
use skiff_core::config::Config;

#[derive(Parser)]
#[command(name = "skiff", about = "Bridge a chat platform to an agent framework")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the adapter
    Start {
        /// Path to the TOML configuration file
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start { config } => run(config).await,
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = create_platform_client(&config)?;
    let transport = Arc::new(WsTransport::new());
    let config = Arc::new(config);
    let adapter = Adapter::new(config.clone(), client, transport.clone());

    let server = ws::serve(
        transport,
        adapter.bus().clone(),
        &config.event_bus.host,
        config.event_bus.port,
    )
    .await
    .context("Failed to bind event socket")?;

    adapter.start().await?;

    let mut fatal = adapter.fatal_signal();
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            Ok(())
        }
        _ = fatal.changed() => {
            Err(anyhow::anyhow!("connection lost beyond max_reconnect_attempts"))
        }
    };

    adapter.stop().await;
    server.abort();
    outcome
}
