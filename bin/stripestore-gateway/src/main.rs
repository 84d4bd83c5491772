//! Stripestore Gateway - the RAID coordinator daemon
//!
//! Owns the catalog and the health monitor, and serves the file API over
//! HTTP: upload, download, delete, list, search, info and cluster status.

mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use stripestore_catalog::Catalog;
use stripestore_client::{BlockTransport, NodePool, TransportPolicy};
use stripestore_common::{Config, NodeId};
use stripestore_health::HealthMonitor;
use stripestore_raid::RaidCoordinator;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stripestore-gateway")]
#[command(about = "Stripestore RAID coordinator daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/stripestore/gateway.toml")]
    config: String,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file structure: the shared cluster config plus
/// gateway-local settings
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    gateway: GatewaySection,
    #[serde(flatten)]
    core: Config,
}

#[derive(Debug, Deserialize)]
struct GatewaySection {
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_catalog_dir")]
    catalog_dir: String,
    /// Informational status artifact, written best-effort after status
    /// queries; never authoritative
    #[serde(default = "default_status_artifact")]
    status_artifact: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            catalog_dir: default_catalog_dir(),
            status_artifact: default_status_artifact(),
            log_level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:7000".to_string()
}

fn default_catalog_dir() -> String {
    "./catalog".to_string()
}

fn default_status_artifact() -> String {
    "./raid-status.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config: FileConfig = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).context("failed to parse config")?
    } else {
        FileConfig::default()
    };

    let listen = args.listen.unwrap_or_else(|| config.gateway.listen.clone());
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.gateway.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Invalid cluster parameters are fatal before anything is served.
    config.core.validate().context("invalid configuration")?;
    let cluster = config.core.cluster.clone();
    info!(
        nodes = cluster.node_count(),
        block_size = cluster.block_size,
        "starting stripestore gateway"
    );

    // One pooled client per node, all bound to the same immutable policy.
    let policy = TransportPolicy::from_config(&config.core.transport);
    let pool = NodePool::new(policy);
    let mut transports: HashMap<NodeId, Arc<dyn BlockTransport>> = HashMap::new();
    let mut monitored: Vec<(Arc<dyn BlockTransport>, String)> = Vec::new();
    for node in &cluster.nodes {
        let client = pool
            .get_or_create(NodeId::new(node.id), &node.endpoint)
            .await?;
        transports.insert(NodeId::new(node.id), client.clone() as Arc<dyn BlockTransport>);
        monitored.push((client as Arc<dyn BlockTransport>, node.endpoint.clone()));
    }

    let monitor = Arc::new(HealthMonitor::new(
        monitored,
        config.core.health.failure_threshold(),
    ));
    info!("probing fleet");
    monitor.check_all().await;
    let stats = monitor.availability_stats();
    info!(
        online = stats.online,
        total = stats.total,
        status = %stats.status,
        "initial fleet status"
    );
    monitor.start(config.core.health.check_interval());

    let (catalog, reconciliation) = Catalog::open(PathBuf::from(&config.gateway.catalog_dir))
        .await
        .context("failed to open catalog")?;

    let coordinator = Arc::new(RaidCoordinator::new(
        cluster,
        Arc::new(catalog),
        transports,
        monitor.clone(),
    )?);
    coordinator.spawn_event_consumer();

    // Blocks referenced by dropped incomplete records are reclaimed
    // best-effort; whatever survives is reaped node-side later.
    if !reconciliation.orphaned_blocks.is_empty() {
        let reclaimed = coordinator
            .reclaim_blocks(&reconciliation.orphaned_blocks)
            .await;
        warn!(
            dropped_records = reconciliation.dropped_records,
            orphans = reconciliation.orphaned_blocks.len(),
            reclaimed,
            "startup reconciliation"
        );
    }

    let state = Arc::new(handlers::GatewayState::new(
        coordinator,
        PathBuf::from(&config.gateway.status_artifact),
    ));
    let app = handlers::router(state, config.core.cluster.max_file_size);

    let addr: SocketAddr = listen.parse()?;
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down...");
        })
        .await?;

    monitor.stop();
    info!("gateway shut down gracefully");
    Ok(())
}
