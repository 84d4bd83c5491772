//! Stripestore Node - storage node daemon
//!
//! Serves the block store contract over HTTP for one node of the fleet.

mod service;

use anyhow::{bail, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use stripestore_common::NodeId;
use stripestore_store::BlockStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "stripestore-node")]
#[command(about = "Stripestore storage node daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/stripestore/node.toml")]
    config: String,

    /// Node id in [1..N]; required here or in the config file
    #[arg(long)]
    node_id: Option<u8>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Data directory for block payloads and sidecars
    #[arg(long)]
    data_dir: Option<String>,

    /// Advisory storage capacity in bytes
    #[arg(long)]
    capacity: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    node: NodeSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
struct NodeSection {
    /// No ambient default: the id must be bound explicitly
    #[serde(default)]
    id: Option<u8>,
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default = "default_capacity")]
    capacity: u64,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingSection {
    #[serde(default = "default_log_level")]
    level: String,
}

fn default_listen() -> String {
    "0.0.0.0:7101".to_string()
}

fn default_data_dir() -> String {
    "./node-data".to_string()
}

fn default_capacity() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str)?
    } else {
        Config::default()
    };

    // CLI takes precedence over the config file.
    let listen = args.listen.unwrap_or(config.node.listen);
    let data_dir = args.data_dir.unwrap_or(config.node.data_dir);
    let capacity = args.capacity.unwrap_or(config.node.capacity);
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.logging.level
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The node id is bound from configuration, never assumed.
    let Some(node_id) = args.node_id.or(config.node.id) else {
        bail!("node id not configured; pass --node-id or set [node].id in {}", args.config);
    };
    if node_id == 0 {
        bail!("node id must be in [1..N], got 0");
    }
    let node_id = NodeId::new(node_id);

    info!("Starting stripestore node {node_id}");
    info!("Data directory: {data_dir}");
    info!("Capacity: {capacity} bytes");

    let store = BlockStore::open(PathBuf::from(&data_dir), capacity).await?;
    info!(
        blocks = store.total_blocks(),
        used = store.used_space(),
        "block store opened"
    );

    let state = Arc::new(service::NodeState::new(node_id, store));
    let app = service::router(state);

    let addr: SocketAddr = listen.parse()?;
    info!("Listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Node {node_id} shut down gracefully");
    Ok(())
}
