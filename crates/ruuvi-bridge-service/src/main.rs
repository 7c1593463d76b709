//! Ruuvi Bridge - RuuviTag to smart-home bridge service.
//!
//! Run with: `cargo run -p ruuvi-bridge-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ruuvi_bridge_core::{
    CommissioningTracker, HttpRegistry, LocalNode, Reconciler, ReconcilerStatus,
};
use ruuvi_bridge_service::{AppState, CommissionOverride, Config, api, apply_override};

/// Ruuvi Bridge - publishes RuuviTag sensors into a smart-home mesh.
#[derive(Parser, Debug)]
#[command(name = "ruuvi-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Bind address for the status API (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Gateway tag list URL (overrides config).
    #[arg(long, env = "GATEWAY_API")]
    registry_url: Option<String>,

    /// Directory for persisted bridge state (overrides config).
    #[arg(short, long, env = "STORAGE_PATH")]
    storage: Option<PathBuf>,

    /// Disable the reconciler (status API only).
    #[arg(long)]
    no_reconciler: bool,

    /// Mark the bridge commissioned or decommissioned before starting.
    #[arg(long, value_enum)]
    commission: Option<CommissionOverride>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ruuvi_bridge_service=info".parse()?)
                .add_directive("ruuvi_bridge_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.registry_url {
        config.registry.url = url;
    }
    if let Some(storage) = args.storage {
        config.bridge.storage_path = storage;
    }

    config.validate()?;

    if !config.bridge.enabled {
        info!("Bridge is disabled in configuration, exiting");
        return Ok(());
    }

    // Open the bridge node
    info!("Opening bridge state in {:?}", config.bridge.storage_path);
    let node = Arc::new(LocalNode::open(config.node_config())?);
    apply_override(&node, args.commission).await?;

    let cancel = CancellationToken::new();

    // Follow commissioning
    let tracker = CommissioningTracker::initialize(node.clone());
    let pairing = tracker.status();
    let tracker_task = tracker.spawn(cancel.clone());

    // Start the reconciler
    let (reconciler_status, reconciler_task) = if args.no_reconciler {
        info!("Reconciler disabled");
        let (_, rx) = watch::channel(ReconcilerStatus::default());
        (rx, None)
    } else {
        let registry = HttpRegistry::new(&config.registry.url, config.registry.timeout())?;
        info!("Polling registry at {}", registry.url());
        let reconciler = Reconciler::new(
            Arc::new(registry),
            node.clone(),
            config.reconciler_options()?,
        );
        (reconciler.status(), Some(reconciler.spawn(cancel.clone())))
    };

    // Create application state
    let state = AppState::new(config.clone(), pairing, reconciler_status, node);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Stop background tasks; a cycle in flight finishes first
    cancel.cancel();
    if let Some(task) = reconciler_task {
        task.await?;
    }
    tracker_task.await?;

    info!("Bridge stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
                cancel.cancelled().await;
            }
        }
        _ = cancel.cancelled() => {}
    }
    info!("Shutting down");
    cancel.cancel();
}
