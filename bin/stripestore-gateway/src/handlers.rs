//! Gateway HTTP handlers

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use stripestore_api::{
    DeleteFileResponse, ErrorBody, FileListResponse, FileSummary, GatewayHealthResponse,
    NodeStatusEntry, RaidStatusResponse, UploadResponse, HDR_FILE_NAME,
};
use stripestore_common::{Error, FileRecord};
use stripestore_raid::RaidCoordinator;
use tracing::{debug, warn};

/// Shared state for the gateway service
pub struct GatewayState {
    coordinator: Arc<RaidCoordinator>,
    started: Instant,
    status_artifact: PathBuf,
}

impl GatewayState {
    pub fn new(coordinator: Arc<RaidCoordinator>, status_artifact: PathBuf) -> Self {
        Self {
            coordinator,
            started: Instant::now(),
            status_artifact,
        }
    }
}

/// Error wrapper mapping the taxonomy onto user-visible responses
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from_error(&self.0))).into_response()
    }
}

/// Build the gateway router
pub fn router(state: Arc<GatewayState>, max_file_size: u64) -> Router {
    Router::new()
        .route("/v1/files", post(upload).get(list_files))
        .route("/v1/files/search", get(search_files))
        .route("/v1/files/{name}", get(download).delete(delete_file))
        .route("/v1/files/{name}/info", get(file_info))
        .route("/v1/status/raid", get(status_raid))
        .route("/v1/status/nodes", get(status_nodes))
        .route("/v1/status/health", get(status_health))
        .layer(DefaultBodyLimit::max(max_file_size as usize + 4096))
        .with_state(state)
}

/// PDF admission at the edge: content type and file magic both have to agree
fn validate_pdf(content_type: &str, data: &[u8]) -> Result<(), Error> {
    if !content_type.eq_ignore_ascii_case("application/pdf") {
        return Err(Error::validation(format!(
            "only application/pdf uploads are accepted, got {content_type}"
        )));
    }
    if !data.starts_with(b"%PDF-") {
        return Err(Error::validation("file content is not a PDF"));
    }
    Ok(())
}

async fn upload(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let file_name = headers
        .get(HDR_FILE_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError(Error::validation("missing file name header")))?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    validate_pdf(&content_type, &body).map_err(ApiError)?;
    debug!(file = %file_name, size = body.len(), "upload");

    let outcome = state
        .coordinator
        .store_file(&file_name, &content_type, body)
        .await?;

    Ok(Json(UploadResponse {
        ok: true,
        file_id: outcome.file_id.to_string(),
        blocks_created: outcome.blocks_created,
        nodes_used: outcome.nodes_used.iter().map(|n| n.get()).collect(),
    }))
}

async fn download(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let (record, bytes) = state.coordinator.fetch_file(&name).await?;
    let response = (
        [(header::CONTENT_TYPE, record.content_type)],
        bytes,
    );
    Ok(response.into_response())
}

async fn delete_file(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteFileResponse>, ApiError> {
    let (_, blocks_deleted) = state.coordinator.delete_file(&name).await?;
    Ok(Json(DeleteFileResponse {
        ok: true,
        blocks_deleted,
    }))
}

fn to_listing(records: Vec<FileRecord>) -> FileListResponse {
    let total_size = records.iter().map(|r| r.size).sum();
    let files: Vec<FileSummary> = records.iter().map(FileSummary::from).collect();
    FileListResponse {
        total_count: files.len(),
        total_size,
        files,
    }
}

async fn list_files(State(state): State<Arc<GatewayState>>) -> Json<FileListResponse> {
    Json(to_listing(state.coordinator.list_files()))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
}

async fn search_files(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<FileListResponse>, ApiError> {
    let records = state.coordinator.search_files(&params.query)?;
    Ok(Json(to_listing(records)))
}

async fn file_info(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<FileRecord>, ApiError> {
    Ok(Json(state.coordinator.file_info(&name)?))
}

fn node_entries(state: &GatewayState) -> Vec<NodeStatusEntry> {
    let stale_after = state.coordinator.health().stale_after();
    let cluster = state.coordinator.cluster();
    let mut entries: Vec<NodeStatusEntry> = state
        .coordinator
        .health()
        .snapshot()
        .into_values()
        .map(|node| NodeStatusEntry {
            node_id: node.node_id.get(),
            endpoint: node.endpoint.clone(),
            status: node.status.to_string(),
            healthy: node.is_healthy(stale_after),
            capacity: cluster.node_capacity(node.node_id),
            error_count: node.error_count,
            last_heartbeat: node.last_heartbeat,
            response_time_ms: node.response_time.map(|d| d.as_millis() as u64),
        })
        .collect();
    entries.sort_by_key(|e| e.node_id);
    entries
}

async fn status_raid(State(state): State<Arc<GatewayState>>) -> Json<RaidStatusResponse> {
    let stats = state.coordinator.health().availability_stats();
    let (files_stored, bytes_stored) = state.coordinator.catalog().stats();
    let response = RaidStatusResponse {
        status: stats.status,
        nodes_total: stats.total,
        nodes_online: stats.online,
        nodes: node_entries(&state),
        files_stored,
        bytes_stored,
    };

    // Informational artifact only; failures are logged and ignored.
    if let Ok(json) = serde_json::to_vec_pretty(&response) {
        if let Err(e) = tokio::fs::write(&state.status_artifact, json).await {
            warn!(
                path = %state.status_artifact.display(),
                "failed to write status artifact: {e}"
            );
        }
    }

    Json(response)
}

async fn status_nodes(State(state): State<Arc<GatewayState>>) -> Json<Vec<NodeStatusEntry>> {
    Json(node_entries(&state))
}

async fn status_health(State(state): State<Arc<GatewayState>>) -> Json<GatewayHealthResponse> {
    Json(GatewayHealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_admission() {
        assert!(validate_pdf("application/pdf", b"%PDF-1.4 rest").is_ok());
        assert!(validate_pdf("APPLICATION/PDF", b"%PDF-1.7").is_ok());

        // Wrong declared type.
        assert!(validate_pdf("text/plain", b"%PDF-1.4").is_err());
        // Right type, wrong magic.
        assert!(validate_pdf("application/pdf", b"plain text").is_err());
        // Too short for the magic.
        assert!(validate_pdf("application/pdf", b"%PD").is_err());
    }
}
