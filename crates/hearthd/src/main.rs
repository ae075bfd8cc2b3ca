//! hearthd: the hearth node daemon.
//!
//! One process per cluster node:
//! - State store (redb)
//! - Docker engine client
//! - Node selector + peer forwarding client
//! - Game-server orchestrator
//! - Node API (axum)
//! - Location reconciler
//!
//! # Usage
//!
//! ```text
//! hearthd run --config /etc/hearth/hearth.toml --port 7700 --data-dir /var/lib/hearth
//! ```

mod reconciler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use hearth_api::NodeClient;
use hearth_engine::DockerEngine;
use hearth_orchestrator::{GameServerOrchestrator, HearthConfig, NodeForwarder};
use hearth_placement::StrategySelector;
use hearth_state::{CachedStore, StateStore};

use crate::reconciler::Reconciler;

const RECORD_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "hearthd", about = "Hearth game-server node daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the node API and manage game-server containers on this host.
    Run {
        /// Path to hearth.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "7700")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/hearth")]
        data_dir: PathBuf,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let config = load_config(config)?;
            run(config, port, data_dir).await
        }
        Command::Config { config } => {
            print!("{}", load_config(config)?.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hearthd=debug,hearth=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<HearthConfig> {
    match path {
        Some(path) => HearthConfig::from_file(&path)
            .map_err(|e| e.context(format!("loading {}", path.display()))),
        None => Ok(HearthConfig::default()),
    }
}

async fn run(config: HearthConfig, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!(node = %config.node.id, "hearth daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("hearth.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    for peer in &config.peers {
        if peer.id == config.node.id {
            warn!(node = %peer.id, "skipping peer entry with this node's id");
            continue;
        }
        store.put_node(peer)?;
    }
    let local = config.node.to_node_info(port);
    store.put_node(&local)?;
    info!(peers = config.peers.len(), "node table seeded");

    let runtime = Arc::new(DockerEngine::new(config.engine.socket.clone()));
    info!(socket = ?config.engine.socket, "docker engine client ready");

    let selector = Arc::new(StrategySelector::new(
        store.clone(),
        local.clone(),
        config.placement.clone(),
    ));
    info!(strategy = ?config.placement.strategy, "node selector initialized");

    let forwarder: Arc<dyn NodeForwarder> = Arc::new(NodeClient::new(store.clone()));
    let orchestrator = Arc::new(GameServerOrchestrator::new(
        runtime,
        Arc::new(CachedStore::new(store.clone(), RECORD_CACHE_TTL)),
        Arc::new(store.clone()),
        selector,
        Some(forwarder),
        config.node.clone(),
        config.orchestrator.clone(),
    ));
    info!("orchestrator initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let reconciler = Reconciler::new(
        orchestrator.clone(),
        store.clone(),
        local,
        config.reconcile_interval(),
    );
    let reconcile_handle = tokio::spawn(reconciler.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = hearth_api::build_router(orchestrator, store);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "node API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c; shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reconcile_handle.await;

    info!("hearth daemon stopped");
    Ok(())
}
