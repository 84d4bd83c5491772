//! Node HTTP service

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use stripestore_api::{
    BlockExistsResponse, CleanupResponse, DeleteBlockResponse, ErrorBody, ListBlocksResponse,
    NodeHealthResponse, NodeHealthStatus, NodeInfoResponse, StoreBlockResponse,
    VerifyBlockRequest, VerifyBlockResponse, HDR_CHECKSUM, HDR_PARITY, HDR_REQUEST_ID,
};
use stripestore_common::{verify_checksum, Error, NodeId};
use stripestore_store::BlockStore;
use tracing::debug;

/// Shared state for the node service
pub struct NodeState {
    node_id: NodeId,
    store: BlockStore,
    started: Instant,
    io_errors: AtomicU64,
}

impl NodeState {
    pub fn new(node_id: NodeId, store: BlockStore) -> Self {
        Self {
            node_id,
            store,
            started: Instant::now(),
            io_errors: AtomicU64::new(0),
        }
    }

    /// Record server-class failures for the health report
    fn fail(&self, error: Error) -> ApiError {
        if matches!(error, Error::Io(_) | Error::StorageFailure(_)) {
            self.io_errors.fetch_add(1, Ordering::Relaxed);
        }
        ApiError(error)
    }
}

/// Error wrapper mapping the taxonomy onto HTTP responses
#[derive(Debug)]
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from_error(&self.0))).into_response()
    }
}

/// Build the node router
pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/v1/blocks", get(list_blocks))
        .route(
            "/v1/blocks/{block_id}",
            put(store_block).get(retrieve_block).delete(delete_block),
        )
        .route("/v1/blocks/{block_id}/exists", get(block_exists))
        .route("/v1/blocks/{block_id}/verify", post(verify_block))
        .route("/v1/cleanup", post(cleanup))
        .route("/v1/info", get(node_info))
        .route("/v1/health", get(health))
        .with_state(state)
}

/// Undo transport compression if the envelope marks it
fn decode_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes, Error> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    match encoding {
        Some("gzip") => {
            let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::validation(format!("bad gzip payload: {e}")))?;
            Ok(Bytes::from(out))
        }
        Some(other) => Err(Error::validation(format!(
            "unsupported content encoding: {other}"
        ))),
        None => Ok(body),
    }
}

async fn store_block(
    State(state): State<Arc<NodeState>>,
    Path(block_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoreBlockResponse>, ApiError> {
    let payload = decode_body(&headers, body).map_err(ApiError)?;

    // The envelope checksum guards against in-flight mangling.
    if let Some(expected) = headers.get(HDR_CHECKSUM).and_then(|v| v.to_str().ok()) {
        if !verify_checksum(&payload, expected) {
            return Err(ApiError(Error::validation(
                "payload does not match envelope checksum",
            )));
        }
    }

    let is_parity = headers
        .get(HDR_PARITY)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let request_id = headers
        .get(HDR_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    debug!(block_id, request_id, size = payload.len(), is_parity, "store request");
    let stored = state
        .store
        .store_block(&block_id, payload, is_parity)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(StoreBlockResponse {
        ok: true,
        stored_at: stored.stored_at,
        checksum: stored.checksum,
    }))
}

async fn retrieve_block(
    State(state): State<Arc<NodeState>>,
    Path(block_id): Path<String>,
) -> Result<Response, ApiError> {
    let (payload, sidecar) = state
        .store
        .retrieve_block(&block_id)
        .await
        .map_err(|e| state.fail(e))?;

    let response = (
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            (HeaderName::from_static(HDR_CHECKSUM), sidecar.checksum),
        ],
        payload,
    );
    Ok(response.into_response())
}

async fn delete_block(
    State(state): State<Arc<NodeState>>,
    Path(block_id): Path<String>,
) -> Result<Json<DeleteBlockResponse>, ApiError> {
    state
        .store
        .delete_block(&block_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(DeleteBlockResponse { ok: true }))
}

async fn block_exists(
    State(state): State<Arc<NodeState>>,
    Path(block_id): Path<String>,
) -> Json<BlockExistsResponse> {
    Json(BlockExistsResponse {
        exists: state.store.block_exists(&block_id).await,
    })
}

async fn verify_block(
    State(state): State<Arc<NodeState>>,
    Path(block_id): Path<String>,
    Json(request): Json<VerifyBlockRequest>,
) -> Json<VerifyBlockResponse> {
    Json(VerifyBlockResponse {
        valid: state
            .store
            .verify_integrity(&block_id, &request.checksum)
            .await,
    })
}

async fn list_blocks(
    State(state): State<Arc<NodeState>>,
) -> Result<Json<ListBlocksResponse>, ApiError> {
    let block_ids = state.store.list_blocks().await.map_err(|e| state.fail(e))?;
    Ok(Json(ListBlocksResponse { block_ids }))
}

async fn cleanup(
    State(state): State<Arc<NodeState>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = state
        .store
        .cleanup_orphans()
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(CleanupResponse { removed }))
}

async fn node_info(State(state): State<Arc<NodeState>>) -> Json<NodeInfoResponse> {
    Json(NodeInfoResponse {
        node_id: state.node_id.get(),
        total_storage: state.store.capacity(),
        used_storage: state.store.used_space(),
        available_storage: state.store.available_space(),
        total_blocks: state.store.total_blocks(),
        data_blocks: state.store.data_blocks(),
        parity_blocks: state.store.parity_blocks(),
    })
}

async fn health(State(state): State<Arc<NodeState>>) -> Json<NodeHealthResponse> {
    // A node that can answer is not offline; self-reports only ever say
    // healthy or degraded, the monitor owns the online/offline verdict.
    let error_count = state.io_errors.load(Ordering::Relaxed);
    let status = if error_count < 5 {
        NodeHealthStatus::Healthy
    } else {
        NodeHealthStatus::Degraded
    };
    Json(NodeHealthResponse {
        node_id: state.node_id.get(),
        status,
        uptime_secs: state.started.elapsed().as_secs(),
        error_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripestore_common::checksum;

    async fn state() -> (Arc<NodeState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(dir.path(), 1 << 20).await.unwrap();
        (Arc::new(NodeState::new(NodeId::new(1), store)), dir)
    }

    #[tokio::test]
    async fn test_decode_body_passthrough() {
        let headers = HeaderMap::new();
        let body = Bytes::from_static(b"plain");
        assert_eq!(decode_body(&headers, body).unwrap(), "plain");
    }

    #[tokio::test]
    async fn test_decode_body_gzip() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let compressed = Bytes::from(encoder.finish().unwrap());

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
        assert_eq!(
            decode_body(&headers, compressed).unwrap(),
            "compressed payload"
        );
    }

    #[tokio::test]
    async fn test_decode_body_rejects_unknown_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, "br".parse().unwrap());
        assert!(decode_body(&headers, Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn test_store_rejects_envelope_checksum_mismatch() {
        let (state, _dir) = state().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(HDR_CHECKSUM),
            checksum(b"different bytes").parse().unwrap(),
        );

        let result = store_block(
            State(state),
            Path("f:s=0:k=0:d".to_string()),
            headers,
            Bytes::from_static(b"actual bytes"),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_store_and_health_roundtrip() {
        let (state, _dir) = state().await;
        let body = Bytes::from_static(b"payload");
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(HDR_CHECKSUM),
            checksum(b"payload").parse().unwrap(),
        );

        let response = store_block(
            State(state.clone()),
            Path("f:s=0:k=0:d".to_string()),
            headers,
            body,
        )
        .await
        .unwrap();
        assert!(response.0.ok);

        let info = node_info(State(state.clone())).await;
        assert_eq!(info.0.total_blocks, 1);
        assert_eq!(info.0.used_storage, 7);

        let health = health(State(state)).await;
        assert_eq!(health.0.status, NodeHealthStatus::Healthy);
        assert_eq!(health.0.error_count, 0);
    }
}
