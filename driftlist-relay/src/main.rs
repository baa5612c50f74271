//! Relay entry point.

use clap::Parser;
use driftlist_relay::{RelayConfig, RelayServer, RoomManagerConfig};
use driftlist_storage::AutoPersisterConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "driftlist-relay", version, about = "Rendezvous relay for Driftlist replicas")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,

    /// Shared database file for durable per-identity state.
    #[arg(long, default_value = "driftlist-relay.db", value_name = "PATH")]
    db: PathBuf,

    /// Autosave interval in seconds.
    #[arg(long, default_value_t = 2)]
    autosave_secs: u64,

    /// Autoload interval in seconds (picks up out-of-process writes).
    #[arg(long, default_value_t = 5)]
    autoload_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = RelayConfig {
        bind_addr: cli.bind,
        db_path: cli.db,
        rooms: RoomManagerConfig {
            persist: AutoPersisterConfig {
                autosave_interval: Duration::from_secs(cli.autosave_secs.max(1)),
                autoload_interval: Duration::from_secs(cli.autoload_secs.max(1)),
            },
        },
    };

    let server = RelayServer::bind(config).await?;
    let rooms = server.rooms();

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("[RELAY] shutting down, flushing open rooms");
            rooms.flush_all().await;
        }
    }
    Ok(())
}
