//! Relay node binary
//!
//! Run with: relay [--config relay.json] [--log room_relay=debug]
//!
//! A missing config file is created with defaults and the process exits so
//! the auth keys can be set before the first real run.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use room_relay::{RelayConfig, RelayNode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Game room relay node", long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "relay.json")]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG
    #[arg(short, long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RelayConfig::load_or_create(&args.config)?;
    let node = RelayNode::bind(config).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl+C received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Unable to listen for Ctrl+C"),
        }
    });

    node.run_until(shutdown).await?;
    Ok(())
}
