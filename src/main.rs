//! mpmaster - coordination master for servers sharing one chunked world
//!
//! Loads the config, binds the peer listener and serves until Ctrl-C.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{MasterConfig, DEFAULT_CONFIG_PATH};
use mpmaster_server::{MasterContext, MasterServer, ServerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Chunk ownership and region storage master.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overrides `bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// World root directory, overrides `world_root`.
    #[arg(long)]
    world_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing with INFO level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting mpmaster v{}", env!("CARGO_PKG_VERSION"));

    let mut cfg = MasterConfig::load_from_path(&args.config);
    if let Some(bind) = args.bind {
        cfg.bind_address = bind;
    }
    if let Some(world_root) = args.world_root {
        cfg.world_root = world_root;
    }
    let settings = cfg.to_settings().context("invalid configuration")?;
    info!(
        world_root = %settings.world_root.display(),
        cache = settings.region_cache_capacity,
        idle_timeout_secs = settings.idle_timeout.as_secs(),
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(settings, cfg.status_interval()))
}

async fn run(settings: ServerSettings, status_interval: Option<Duration>) -> Result<()> {
    let bind_address = settings.bind_address;
    let ctx = MasterContext::new(settings);
    let server = MasterServer::bind(Arc::clone(&ctx))
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    if let Some(period) = status_interval {
        tokio::spawn(report_status(Arc::clone(&ctx), period));
    }

    server
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received"),
                Err(err) => warn!(%err, "Failed to listen for Ctrl-C; shutting down"),
            }
        })
        .await
        .context("listener failed")?;

    info!("Master stopped");
    Ok(())
}

/// Log one line per peer every `period`.
async fn report_status(ctx: Arc<MasterContext>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let statuses = ctx.peers().snapshot();
        info!(
            peers = statuses.len(),
            locked_chunks = ctx.locks().len(),
            cached_regions = ctx.regions().len(),
            "Status"
        );
        for status in statuses {
            match status.average_mspt {
                Some(mspt) => info!(
                    peer = %status.name,
                    conn = %status.id,
                    remote = %status.remote,
                    mspt = format_args!("{mspt:.2}"),
                    samples = status.samples,
                    "Peer status"
                ),
                None => info!(
                    peer = %status.name,
                    conn = %status.id,
                    remote = %status.remote,
                    "Peer status (no tick times yet)"
                ),
            }
        }
    }
}
