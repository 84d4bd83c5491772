//! Configuration types for stripestore
//!
//! Cluster, transport and health-monitor settings shared by the gateway and
//! the tooling. Everything is TOML-deserializable with per-field defaults;
//! `Config::validate` runs at startup and invalid cluster parameters are
//! fatal.

use crate::error::{Error, Result};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest allowed stripe cell
pub const MIN_BLOCK_SIZE: usize = 1024;
/// Largest allowed stripe cell
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;
/// Default stripe cell size (64 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Root configuration for the coordinator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cluster topology and sizing
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Transport policy for node clients
    #[serde(default)]
    pub transport: TransportConfig,
    /// Health monitor settings
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Validate the whole configuration; errors here are fatal at startup
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        self.transport.validate()?;
        Ok(())
    }
}

/// One configured storage node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Node id in `[1..=N]`
    pub id: u8,
    /// Base URL, e.g. `http://10.0.0.11:7101`
    pub endpoint: String,
    /// Declared capacity in bytes; falls back to the cluster-wide
    /// `max_node_storage` when unset
    #[serde(default)]
    pub capacity: Option<u64>,
}

/// Cluster topology and file sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The fixed storage fleet
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeEndpoint>,
    /// Stripe cell size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Upper bound on a single upload in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Advisory cap per node in bytes
    #[serde(default = "default_node_storage")]
    pub max_node_storage: u64,
}

impl ClusterConfig {
    /// Total node count N
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Data members per stripe, D = N - 1
    #[must_use]
    pub fn data_width(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Configured node ids in declaration order
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| NodeId::new(n.id)).collect()
    }

    /// The coordinator's advisory capacity for one node: the node's declared
    /// capacity, capped at `max_node_storage`, with `max_node_storage` as
    /// the fallback when none is declared. Unknown ids report zero.
    #[must_use]
    pub fn node_capacity(&self, node_id: NodeId) -> u64 {
        self.nodes
            .iter()
            .find(|n| n.id == node_id.get())
            .map(|n| {
                n.capacity
                    .unwrap_or(self.max_node_storage)
                    .min(self.max_node_storage)
            })
            .unwrap_or(0)
    }

    fn validate(&self) -> Result<()> {
        let n = self.nodes.len();
        if n < 3 {
            return Err(Error::InvalidConfig(format!(
                "cluster needs at least 3 nodes, got {n}"
            )));
        }
        if n > u8::MAX as usize {
            return Err(Error::InvalidConfig(format!("too many nodes: {n}")));
        }

        // Node ids must be exactly 1..=N so the rotation rule is total.
        let mut ids: Vec<u8> = self.nodes.iter().map(|e| e.id).collect();
        ids.sort_unstable();
        let expected: Vec<u8> = (1..=n as u8).collect();
        if ids != expected {
            return Err(Error::InvalidConfig(format!(
                "node ids must be exactly 1..={n}, got {ids:?}"
            )));
        }

        let mut endpoints: Vec<&str> = self.nodes.iter().map(|e| e.endpoint.as_str()).collect();
        endpoints.sort_unstable();
        endpoints.dedup();
        if endpoints.len() != n {
            return Err(Error::InvalidConfig("duplicate node endpoints".into()));
        }
        for node in &self.nodes {
            if !node.endpoint.starts_with("http://") && !node.endpoint.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "node {} endpoint must be an http(s) URL: {}",
                    node.id, node.endpoint
                )));
            }
            if node.capacity == Some(0) {
                return Err(Error::InvalidConfig(format!(
                    "node {} capacity must be positive",
                    node.id
                )));
            }
        }

        if self.max_node_storage == 0 {
            return Err(Error::InvalidConfig(
                "max_node_storage must be positive".into(),
            ));
        }
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(Error::InvalidConfig(format!(
                "block_size {} out of range [{MIN_BLOCK_SIZE}, {MAX_BLOCK_SIZE}]",
                self.block_size
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::InvalidConfig("max_file_size must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            block_size: default_block_size(),
            max_file_size: default_max_file_size(),
            max_node_storage: default_node_storage(),
        }
    }
}

/// Transport policy settings.
///
/// These apply to clients created after the settings are read; existing pool
/// entries keep the policy they were built with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Per-operation timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry attempts per transport failure
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Fixed wait between retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Whether to gzip payloads above the threshold
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    /// Minimum payload size in bytes before compression kicks in
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    /// In-flight request cap per node endpoint
    #[serde(default = "default_max_connections_per_server")]
    pub max_connections_per_server: usize,
}

impl TransportConfig {
    /// Per-operation timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fixed wait between retries
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig("request_timeout must be positive".into()));
        }
        if self.max_connections_per_server == 0 {
            return Err(Error::InvalidConfig(
                "max_connections_per_server must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            compression_enabled: default_compression_enabled(),
            compression_threshold: default_compression_threshold(),
            max_connections_per_server: default_max_connections_per_server(),
        }
    }
}

/// Health monitor settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between probe rounds
    #[serde(default = "default_health_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Minutes of heartbeat absence before a node counts as stale
    #[serde(default = "default_node_failure_threshold_mins")]
    pub node_failure_threshold_mins: u64,
}

impl HealthConfig {
    /// Interval between probe rounds
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Staleness threshold for `is_healthy`
    #[must_use]
    pub fn failure_threshold(&self) -> Duration {
        Duration::from_secs(self.node_failure_threshold_mins * 60)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_health_check_interval_secs(),
            node_failure_threshold_mins: default_node_failure_threshold_mins(),
        }
    }
}

fn default_nodes() -> Vec<NodeEndpoint> {
    (1..=4)
        .map(|id| NodeEndpoint {
            id,
            endpoint: format!("http://127.0.0.1:{}", 7100 + id as u16),
            capacity: None,
        })
        .collect()
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_node_storage() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_compression_enabled() -> bool {
    true
}

fn default_compression_threshold() -> usize {
    4 * 1024
}

fn default_max_connections_per_server() -> usize {
    8
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_node_failure_threshold_mins() -> u64 {
    2
}
