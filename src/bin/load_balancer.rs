//! Load balancer binary
//!
//! Run with: load_balancer [--config load_balancer.json] [--log room_relay=debug]

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use room_relay::{BalancerConfig, LoadBalancer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay load balancer", long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "load_balancer.json")]
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

    let config = BalancerConfig::load_or_create(&args.config)?;
    let balancer = LoadBalancer::bind(config).await?;

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

    balancer.run_until(shutdown).await?;
    Ok(())
}
