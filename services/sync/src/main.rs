//! Game sync service entry point

use adapter_service::build_adapter;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sync_cache::InMemoryStore;
use sync_config::GameSyncConfig;
use sync_service::{InMemoryBroker, LiveServer, SyncCore};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay under config/environments
    #[arg(short, long)]
    env: Option<String>,

    /// Emit JSON logs regardless of configuration
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(config: &GameSyncConfig, force_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "game_sync={level},sync_service={level},adapter_service={level},sync_cache={level},warn",
            level = config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if force_json || config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = GameSyncConfig::load(args.config.as_deref(), args.env.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config, args.json_logs);

    info!("Starting game sync service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let broker = Arc::new(InMemoryBroker::new(config.broker.channel_capacity));
    let store = Arc::new(InMemoryStore::new());
    let core = Arc::new(SyncCore::new(config.clone(), broker, store));

    for adapter_config in config.adapters.iter().filter(|a| a.enabled) {
        let registered = match build_adapter(adapter_config) {
            Ok(adapter) => core
                .registry()
                .register_adapter(adapter, adapter_config.clone())
                .await,
            Err(e) => Err(e),
        };
        if let Err(e) = registered {
            warn!("Skipping adapter {}: {}", adapter_config.game_id, e);
        }
    }

    core.start().await;

    let (stop_live, live_stopped) = oneshot::channel::<()>();
    let live_handle = if config.live.enabled {
        let server = LiveServer::new(core.clone());
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = live_stopped.await;
            };
            if let Err(e) = server.run(shutdown).await {
                error!("Live server error: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");

    let _ = stop_live.send(());
    if let Some(handle) = live_handle {
        if let Err(e) = handle.await {
            error!("Live server task failed: {}", e);
        }
    }
    core.shutdown().await;

    Ok(())
}
