use anyhow::Result;
use clap::Parser;
use tracing::info;

mod blob;
mod bus;
mod config;
mod db;
mod server;
mod telemetry;

use crate::config::{Args, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(&args)?;

    telemetry::init(&config.log)?;

    info!("Murmur Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.log_config();

    server::start(config).await?;

    Ok(())
}
