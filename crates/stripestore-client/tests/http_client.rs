//! Transport policy tests against a live in-process node stub

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::put;
use axum::{Json, Router};
use chrono::Utc;
use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stripestore_api::{ErrorBody, StoreBlockResponse};
use stripestore_client::{BlockTransport, NodeClient, StoreBlock, TransportPolicy};
use stripestore_common::{checksum, Error, NodeId};

#[derive(Default)]
struct StubState {
    attempts: AtomicU32,
    /// Respond 503 to this many requests before succeeding
    fail_first: u32,
    /// Artificial handler latency in milliseconds
    delay_ms: u64,
}

async fn spawn_stub(state: Arc<StubState>) -> String {
    let app = Router::new()
        .route(
            "/v1/blocks/{block_id}",
            put(store_handler).get(retrieve_handler),
        )
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn store_handler(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoreBlockResponse>, (StatusCode, Json<ErrorBody>)> {
    let attempt = state.attempts.fetch_add(1, Ordering::SeqCst);
    if state.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(state.delay_ms)).await;
    }
    if attempt < state.fail_first {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "node busy".into(),
                code: "transport_error".into(),
            }),
        ));
    }

    let payload = if headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        == Some("gzip")
    {
        let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    } else {
        body.to_vec()
    };

    Ok(Json(StoreBlockResponse {
        ok: true,
        stored_at: Utc::now(),
        checksum: checksum(&payload),
    }))
}

async fn retrieve_handler(
    State(state): State<Arc<StubState>>,
) -> (StatusCode, Json<ErrorBody>) {
    state.attempts.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "block not found".into(),
            code: "not_found".into(),
        }),
    )
}

fn fast_policy() -> TransportPolicy {
    TransportPolicy {
        request_timeout: Duration::from_secs(5),
        max_retry_attempts: 3,
        retry_delay: Duration::from_millis(10),
        compression_enabled: false,
        compression_threshold: 4096,
        max_connections_per_server: 4,
    }
}

fn store_request(data: &[u8]) -> StoreBlock {
    StoreBlock {
        block_id: "11111111-1111-1111-1111-111111111111:s=0:k=0:d".into(),
        data: Bytes::copy_from_slice(data),
        checksum: checksum(data),
        stripe_index: 0,
        position: 0,
        is_parity: false,
    }
}

#[tokio::test]
async fn test_store_retries_transient_5xx() {
    let state = Arc::new(StubState {
        fail_first: 2,
        ..Default::default()
    });
    let endpoint = spawn_stub(state.clone()).await;

    let client = NodeClient::new(NodeId::new(1), &endpoint, fast_policy()).unwrap();
    let response = client.store_block(&store_request(b"payload")).await.unwrap();
    assert!(response.ok);
    assert_eq!(state.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_demote_to_node_unavailable() {
    let state = Arc::new(StubState {
        fail_first: u32::MAX,
        ..Default::default()
    });
    let endpoint = spawn_stub(state.clone()).await;

    let client = NodeClient::new(NodeId::new(2), &endpoint, fast_policy()).unwrap();
    let err = client.store_block(&store_request(b"payload")).await.unwrap_err();
    assert!(matches!(err, Error::NodeUnavailable { .. }));
    // Initial attempt plus three retries.
    assert_eq!(state.attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let state = Arc::new(StubState::default());
    let endpoint = spawn_stub(state.clone()).await;

    let client = NodeClient::new(NodeId::new(3), &endpoint, fast_policy()).unwrap();
    let err = client
        .retrieve_block("11111111-1111-1111-1111-111111111111:s=0:k=0:d")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BlockNotFound(_)));
    assert_eq!(state.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_compresses_large_payloads_transparently() {
    let state = Arc::new(StubState::default());
    let endpoint = spawn_stub(state.clone()).await;

    let mut policy = fast_policy();
    policy.compression_enabled = true;
    policy.compression_threshold = 16;

    let client = NodeClient::new(NodeId::new(4), &endpoint, policy).unwrap();
    // Compressible payload well above the threshold; the stub decompresses
    // and checksums what it received, so a round-trip mismatch would fail
    // the client-side checksum comparison.
    let data = vec![0x41u8; 64 * 1024];
    let response = client.store_block(&store_request(&data)).await.unwrap();
    assert!(response.ok);
}

#[tokio::test]
async fn test_timeout_surfaces_as_node_unavailable() {
    let state = Arc::new(StubState {
        delay_ms: 500,
        ..Default::default()
    });
    let endpoint = spawn_stub(state.clone()).await;

    let policy = TransportPolicy {
        request_timeout: Duration::from_millis(50),
        max_retry_attempts: 1,
        retry_delay: Duration::from_millis(10),
        compression_enabled: false,
        compression_threshold: 4096,
        max_connections_per_server: 4,
    };
    let client = NodeClient::new(NodeId::new(1), &endpoint, policy).unwrap();

    let err = client.store_block(&store_request(b"payload")).await.unwrap_err();
    assert!(matches!(err, Error::NodeUnavailable { .. }));
    assert_eq!(state.attempts.load(Ordering::SeqCst), 2);
}
