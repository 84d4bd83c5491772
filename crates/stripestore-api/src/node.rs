//! Node protocol bodies (`blocks.*`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response to `PUT /v1/blocks/{id}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreBlockResponse {
    pub ok: bool,
    /// When the block hit disk
    pub stored_at: DateTime<Utc>,
    /// Server-side SHA-256 of what was persisted
    pub checksum: String,
}

/// Response to `DELETE /v1/blocks/{id}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteBlockResponse {
    pub ok: bool,
}

/// Response to `GET /v1/blocks/{id}/exists`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockExistsResponse {
    pub exists: bool,
}

/// Response to `GET /v1/blocks`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListBlocksResponse {
    pub block_ids: Vec<String>,
}

/// Body of `POST /v1/blocks/{id}/verify`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyBlockRequest {
    /// Expected SHA-256 hex checksum
    pub checksum: String,
}

/// Response to `POST /v1/blocks/{id}/verify`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyBlockResponse {
    pub valid: bool,
}

/// Response to `POST /v1/cleanup`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// Orphaned artifacts removed
    pub removed: usize,
}

/// Response to `GET /v1/info`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfoResponse {
    pub node_id: u8,
    pub total_storage: u64,
    pub used_storage: u64,
    pub available_storage: u64,
    pub total_blocks: u64,
    pub data_blocks: u64,
    pub parity_blocks: u64,
}

/// Node health states on the wire.
///
/// A responding node self-reports `Healthy` or `Degraded`; `Online` and
/// `Offline` are what the health monitor concludes from the outside and
/// never appear in a self-report (a node that can answer is by definition
/// not offline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealthStatus {
    Healthy,
    Online,
    Degraded,
    Offline,
}

/// Response to `GET /v1/health`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeHealthResponse {
    pub node_id: u8,
    pub status: NodeHealthStatus,
    pub uptime_secs: u64,
    /// I/O failures observed since the daemon started
    pub error_count: u64,
}
