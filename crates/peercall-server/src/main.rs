//! Standalone signaling relay binary.
//!
//! Usage: `peercall-server [config.toml]` (or set `PEERCALL_CONFIG`).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use peercall_core::adapters::quic::server::RelayServer;
use peercall_core::config::{self, RelayServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("PEERCALL_CONFIG"))
        .map(PathBuf::from);
    let config: RelayServerConfig = config::load(config_path.as_deref())?;
    info!(bind_addr = %config.bind_addr, "Relay server starting");

    let server = Arc::new(RelayServer::new(&config)?);
    let accept = tokio::spawn(Arc::clone(&server).run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.close();
    accept.await??;
    Ok(())
}
