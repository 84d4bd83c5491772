//! Gateway API bodies (`files.*`, `status.*`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stripestore_common::{FileRecord, SystemStatus};

/// Response to `POST /v1/files`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub file_id: String,
    /// Data + parity blocks written
    pub blocks_created: usize,
    pub nodes_used: Vec<u8>,
}

/// Response to `DELETE /v1/files/{name}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteFileResponse {
    pub ok: bool,
    /// Blocks confirmed removed; the rest become node-side orphans
    pub blocks_deleted: usize,
}

/// One entry in a file listing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub stripe_count: u64,
}

impl From<&FileRecord> for FileSummary {
    fn from(record: &FileRecord) -> Self {
        Self {
            file_name: record.file_name.clone(),
            size: record.size,
            content_type: record.content_type.clone(),
            uploaded_at: record.uploaded_at,
            stripe_count: record.stripe_count(),
        }
    }
}

/// Response to `GET /v1/files` and `GET /v1/files/search`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileSummary>,
    pub total_count: usize,
    pub total_size: u64,
}

/// Per-node entry in `GET /v1/status/nodes`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatusEntry {
    pub node_id: u8,
    pub endpoint: String,
    pub status: String,
    pub healthy: bool,
    /// Advisory capacity the cluster configuration declares for this node
    pub capacity: u64,
    pub error_count: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
}

/// Response to `GET /v1/status/raid`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaidStatusResponse {
    pub status: SystemStatus,
    pub nodes_total: usize,
    pub nodes_online: usize,
    pub nodes: Vec<NodeStatusEntry>,
    pub files_stored: usize,
    pub bytes_stored: u64,
}

/// Response to `GET /v1/status/health`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayHealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}
