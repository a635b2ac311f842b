//! BRS Peer Monitor
//!
//! Crawls the BRS peer-to-peer network, classifies every peer against the
//! local chain and keeps a persistent table of peers for the explorer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BRS PEER MONITOR                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Local Chain (node API)     ←── Reference block + difficulty│
//! │  Node Explorer / Prober     ←── B1 peer protocol over HTTP  │
//! │  Classifier                 ←── online/sync/stuck/forked    │
//! │  Reconciler + Sweep Guard   ←── One transaction per sweep   │
//! │  Peer Store (RocksDB)       ←── Persistent peer table       │
//! │  HTTP API (8080)            ←── Peers, stats and metrics    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Several store and cache accessors are only reached from tests and the API
#![allow(dead_code)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod geo;
mod monitor;
mod p2p;
mod store;
mod types;

#[cfg(test)]
mod testutil;

use api::Metrics;
use chain::{LocalChain, NodeApiLedger};
use config::MonitorConfig;
use geo::{GeoDatabase, GeoResolver};
use monitor::{NodeExplorer, PeerMonitor, PeerProber, StoreLeaseLock, SweepGuard, SweepOutcome};
use p2p::HttpPeerClient;
use store::PeerStore;
use types::PeerState;

/// Key of the lease shared by every store-mutating job
const LOCK_KEY: &str = "peer_monitor";

/// BRS Peer Monitor - peer network crawler and classifier
#[derive(Parser, Debug)]
#[command(name = "brs-peer-monitor")]
#[command(author = "BRS Explorer Contributors")]
#[command(version)]
#[command(about = "Crawls and classifies the BRS peer network", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "peer-monitor.toml")]
    config: PathBuf,

    /// Data directory for the peer store
    #[arg(short, long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// HTTP API of the local node
    #[arg(long, global = true, env = "BRS_NODE_API_URL")]
    node_api_url: Option<String>,

    /// HTTP API port
    #[arg(long, global = true)]
    api_port: Option<u16>,

    /// Probe peers one at a time
    #[arg(long, global = true)]
    sequential: bool,

    /// Extra bootstrap peer (repeatable)
    #[arg(long = "bootstrap-peer", global = true)]
    bootstrap_peers: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the HTTP API until Ctrl+C
    Run,

    /// Run one full sweep
    Sweep,

    /// Re-probe unreachable peers once
    CheckOffline,

    /// Remove stale peers once
    Cleanup,

    /// Print stored peers
    Peers {
        /// Only peers in this state (online, unreachable, sync, stuck, forked)
        #[arg(long)]
        state: Option<PeerState>,
    },
}

/// Everything a job needs, wired once at startup
struct Components {
    config: Arc<MonitorConfig>,
    store: Arc<RwLock<PeerStore>>,
    guard: Arc<SweepGuard>,
    metrics: Arc<Metrics>,
    monitor: Arc<PeerMonitor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    info!("🌐 BRS Peer Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    tokio::fs::create_dir_all(&cli.data_dir).await?;

    if let Command::Peers { state } = &cli.command {
        let store = PeerStore::open(&cli.data_dir.join("peer_store"))?;
        print_peers(&store, *state);
        return Ok(());
    }

    let components = build(config, &cli.data_dir)?;

    let result = match cli.command {
        Command::Run => run(&components).await,
        Command::Sweep => {
            let outcome = components.monitor.run_sweep().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::CheckOffline => {
            let outcome = components.monitor.run_offline_only_sweep().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Cleanup => {
            match components.monitor.cleanup_stale().await? {
                Some(removed) => println!("Removed {} stale peers", removed),
                None => println!("Cleanup skipped: another job holds the lock"),
            }
            Ok(())
        }
        Command::Peers { .. } => Ok(()),
    };

    // Graceful shutdown: flush store
    {
        let store = components.store.read().await;
        store.flush()?;
        info!("📦 Peer store flushed to disk");
    }

    result
}

/// Load the config file (defaults if missing) and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<MonitorConfig> {
    let config = if cli.config.exists() {
        MonitorConfig::load(&cli.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", cli.config);
        MonitorConfig::default()
    };

    let config = config
        .with_node_api_url(cli.node_api_url.clone())
        .with_api_port(cli.api_port)
        .with_sequential(cli.sequential)
        .with_bootstrap_peers(cli.bootstrap_peers.clone());

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Node API: {}", config.node_api_url);
    info!("   Bootstrap peers: {:?}", config.bootstrap_peers);
    info!("   Sweep interval: {}s", config.sweep_interval_secs);
    info!("   Offline check interval: {}s", config.offline_sweep_interval_secs);
    info!(
        "   Concurrency: {} nodes x {} peers{}",
        config.sweep_concurrency,
        config.node_concurrency,
        if config.sequential { " (sequential)" } else { "" }
    );

    Ok(config)
}

fn build(config: MonitorConfig, data_dir: &Path) -> anyhow::Result<Components> {
    let config = Arc::new(config);

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(config.request_timeout())
        .user_agent(concat!("brs-peer-monitor/", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Offline database is optional; the remote service covers the rest
    let database = match &config.geoip_database {
        Some(path) => match GeoDatabase::open(path) {
            Ok(db) => {
                info!("🌍 GeoIP database loaded from {:?}", db.path());
                Some(Arc::new(db))
            }
            Err(e) => {
                warn!("{}; falling back to {}", e, config.geo_api_url);
                None
            }
        },
        None => None,
    };
    let geo = Arc::new(GeoResolver::new(
        database,
        http.clone(),
        &config.geo_api_url,
        config.geo_cache_ttl(),
    ));

    let client = Arc::new(HttpPeerClient::new(http.clone(), config.default_p2p_port));
    let prober = Arc::new(PeerProber::new(
        client.clone(),
        geo,
        config.min_version()?,
        config.default_p2p_port,
    ));
    let explorer = Arc::new(NodeExplorer::new(
        client,
        prober,
        config.node_concurrency,
        config.sequential,
    ));

    let ledger = Arc::new(NodeApiLedger::new(http.clone(), &config.node_api_url));
    let chain = Arc::new(LocalChain::new(ledger));

    let store_path = data_dir.join("peer_store");
    let store = Arc::new(RwLock::new(PeerStore::open(&store_path)?));
    info!("📦 Peer store opened at {:?}", store_path);

    let lock = Arc::new(StoreLeaseLock::new(store.clone()));
    let guard = Arc::new(SweepGuard::new(lock, LOCK_KEY, config.lock_ttl()));
    let metrics = Arc::new(Metrics::new());

    let monitor = Arc::new(PeerMonitor::new(
        config.clone(),
        chain,
        store.clone(),
        explorer,
        guard.clone(),
        http,
        metrics.clone(),
    ));

    Ok(Components {
        config,
        store,
        guard,
        metrics,
        monitor,
    })
}

/// Scheduler plus HTTP API, until Ctrl+C or a task exits
async fn run(components: &Components) -> anyhow::Result<()> {
    let config = components.config.clone();

    let sweep_handle = tokio::spawn(run_sweeps(components.monitor.clone(), config.clone()));
    let offline_handle = tokio::spawn(run_offline_checks(
        components.monitor.clone(),
        config.clone(),
    ));
    let maintenance_handle = tokio::spawn(run_maintenance(
        components.monitor.clone(),
        config.clone(),
    ));

    let api_handle = tokio::spawn(api::run_api_server(
        config.clone(),
        components.store.clone(),
        components.guard.clone(),
        components.metrics.clone(),
    ));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = sweep_handle => {
            error!("Sweep scheduler exited: {:?}", result);
        }
        result = offline_handle => {
            error!("Offline check scheduler exited: {:?}", result);
        }
        result = maintenance_handle => {
            error!("Maintenance task exited: {:?}", result);
        }
        result = api_handle => {
            error!("HTTP API exited: {:?}", result);
        }
    }

    info!("👋 BRS Peer Monitor shutting down");
    Ok(())
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Full sweeps: one after the startup delay, then every `sweep_interval_secs`
async fn run_sweeps(monitor: Arc<PeerMonitor>, config: Arc<MonitorConfig>) {
    if config.startup_delay_secs > 0 {
        info!("Waiting {}s before the first sweep", config.startup_delay_secs);
        tokio::time::sleep(Duration::from_secs(config.startup_delay_secs)).await;
    }

    // First tick fires immediately
    let mut interval = ticker(config.sweep_interval_secs);

    loop {
        interval.tick().await;

        // Errors are logged by the monitor; the next tick retries
        if let Ok(SweepOutcome::Rejected { found, online_before }) = monitor.run_sweep().await {
            info!("Keeping previous results ({} found, {} online before)", found, online_before);
        }
    }
}

/// Offline-only sweeps every `offline_sweep_interval_secs`
async fn run_offline_checks(monitor: Arc<PeerMonitor>, config: Arc<MonitorConfig>) {
    let mut interval = ticker(config.offline_sweep_interval_secs);
    // Skip the immediate tick; the first full sweep covers it
    interval.tick().await;

    loop {
        interval.tick().await;
        let _ = monitor.run_offline_only_sweep().await;
    }
}

/// Periodic cleanup and reward sync, each only when configured
async fn run_maintenance(monitor: Arc<PeerMonitor>, config: Arc<MonitorConfig>) {
    let mut cleanup =
        (config.cleanup_interval_secs > 0).then(|| ticker(config.cleanup_interval_secs));
    let mut reward = config
        .reward_feed_url
        .is_some()
        .then(|| ticker(config.reward_sync_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = tick_or_never(cleanup.as_mut()) => {
                let _ = monitor.cleanup_stale().await;
            }
            _ = tick_or_never(reward.as_mut()) => {
                let _ = monitor.sync_reward_states().await;
            }
        }
    }
}

async fn tick_or_never(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn print_peers(store: &PeerStore, state: Option<PeerState>) {
    let peers: Vec<_> = store
        .list()
        .into_iter()
        .filter(|p| state.map_or(true, |s| p.state == s))
        .collect();

    println!(
        "{:<40} {:<12} {:<10} {:>10} {:>8} {:>4}",
        "ADDRESS", "STATE", "VERSION", "HEIGHT", "AVAIL%", "CC"
    );
    for p in &peers {
        println!(
            "{:<40} {:<12} {:<10} {:>10} {:>8.2} {:>4}",
            p.announced_address, p.state, p.version, p.height, p.availability, p.country_code
        );
    }
    println!("{} peers", peers.len());
}
