//! Tactical Map Coordination Server
//!
//! Binary entry point: sets up logging, reads the optional bind
//! address from the command line and runs the WebSocket server.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tacmap::network::server::{ServerConfig, TacmapServer};
use tacmap::{INACTIVE_TIMEOUT_SECS, UPDATE_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Some(addr) = std::env::args().nth(1) {
        config.bind_addr = addr
            .parse()
            .with_context(|| format!("invalid bind address: {addr}"))?;
    }

    info!("tacmap server v{VERSION}");
    info!("maintenance rate: {UPDATE_RATE} Hz");
    info!("inactivity timeout: {INACTIVE_TIMEOUT_SECS} s");

    let server = TacmapServer::new(config);
    server.run().await.context("server terminated abnormally")?;
    Ok(())
}
