//! HTTP implementation of the node transport

use crate::policy::TransportPolicy;
use crate::transport::{BlockTransport, RetrievedBlock, StoreBlock};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use stripestore_api::{
    BlockExistsResponse, CleanupResponse, DeleteBlockResponse, ErrorBody, ListBlocksResponse,
    NodeHealthResponse, NodeInfoResponse, StoreBlockResponse, VerifyBlockRequest,
    VerifyBlockResponse, HDR_CHECKSUM, HDR_PARITY, HDR_POSITION, HDR_REQUEST_ID,
    HDR_STRIPE_INDEX,
};
use stripestore_common::{checksums_equal, Error, NodeId, Result};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// HTTP client bound to one node endpoint and one immutable policy
pub struct NodeClient {
    node_id: NodeId,
    endpoint: String,
    http: reqwest::Client,
    policy: TransportPolicy,
    permits: Arc<Semaphore>,
}

impl NodeClient {
    /// Build a client for `endpoint` with the given policy.
    ///
    /// The policy cannot be changed afterwards; reconfiguring means building
    /// a new client.
    pub fn new(node_id: NodeId, endpoint: &str, policy: TransportPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .map_err(|e| Error::transport(format!("client build failed: {e}")))?;
        Ok(Self {
            node_id,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            permits: Arc::new(Semaphore::new(policy.max_connections_per_server)),
            policy,
        })
    }

    /// The endpoint this client is bound to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    /// Run one operation with the fixed-delay retry policy. Transport-class
    /// failures retry up to the attempt cap and then demote to
    /// `NodeUnavailable`; everything else returns immediately.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt >= self.policy.max_retry_attempts {
                        warn!(node = %self.node_id, op, "retries exhausted: {e}");
                        return Err(Error::NodeUnavailable {
                            node_id: self.node_id,
                            reason: e.to_string(),
                        });
                    }
                    attempt += 1;
                    debug!(node = %self.node_id, op, attempt, "transport failure, retrying: {e}");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn maybe_compress(&self, data: &Bytes) -> Result<(Bytes, bool)> {
        if !self.policy.compression_enabled || data.len() <= self.policy.compression_threshold {
            return Ok((data.clone(), false));
        }
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder.write_all(data)?;
        Ok((Bytes::from(encoder.finish()?), true))
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::transport(e.to_string())
    }
}

/// Convert a non-success response into a taxonomy error.
///
/// 5xx and connection-level failures stay retryable; 4xx-class outcomes map
/// to their taxonomy variants and are never retried.
async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("http status {status}"),
    };
    match status {
        400 => Error::Validation(message),
        404 => Error::BlockNotFound(message),
        422 => Error::Integrity(message),
        507 => Error::StorageFailure(message),
        s if s >= 500 => Error::transport(format!("server error {s}: {message}")),
        s => Error::Validation(format!("unexpected status {s}: {message}")),
    }
}

async fn json_or_error<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    resp.json::<T>()
        .await
        .map_err(|e| Error::transport(format!("invalid response body: {e}")))
}

#[async_trait]
impl BlockTransport for NodeClient {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn store_block(&self, request: &StoreBlock) -> Result<StoreBlockResponse> {
        let url = self.url(&format!("/v1/blocks/{}", request.block_id));
        let (body, compressed) = self.maybe_compress(&request.data)?;
        let request_id = uuid::Uuid::new_v4().to_string();

        let response: StoreBlockResponse = self
            .with_retry("store_block", || {
                let body = body.clone();
                let url = url.clone();
                let request_id = request_id.clone();
                async move {
                    let _permit = self.permits.acquire().await.map_err(|_| {
                        Error::transport("client shut down".to_string())
                    })?;
                    let mut req = self
                        .http
                        .put(&url)
                        .header(HDR_CHECKSUM, request.checksum.as_str())
                        .header(HDR_STRIPE_INDEX, request.stripe_index)
                        .header(HDR_POSITION, u64::from(request.position))
                        .header(HDR_PARITY, if request.is_parity { "true" } else { "false" })
                        .header(HDR_REQUEST_ID, request_id)
                        .body(body.to_vec());
                    if compressed {
                        req = req.header(reqwest::header::CONTENT_ENCODING, "gzip");
                    }
                    let resp = req.send().await.map_err(map_send_error)?;
                    json_or_error(resp).await
                }
            })
            .await?;

        // The node recomputes the checksum over what it persisted; a
        // disagreement here means the payload was mangled in flight.
        if !checksums_equal(&response.checksum, &request.checksum) {
            return Err(Error::Integrity(format!(
                "node {} stored checksum {} for block {}, expected {}",
                self.node_id, response.checksum, request.block_id, request.checksum
            )));
        }
        Ok(response)
    }

    async fn retrieve_block(&self, block_id: &str) -> Result<RetrievedBlock> {
        let url = self.url(&format!("/v1/blocks/{block_id}"));
        self.with_retry("retrieve_block", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.get(&url).send().await.map_err(map_send_error)?;
                if !resp.status().is_success() {
                    return Err(error_from_response(resp).await);
                }
                let checksum = resp
                    .headers()
                    .get(HDR_CHECKSUM)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let data = resp.bytes().await.map_err(map_send_error)?;
                Ok(RetrievedBlock { data, checksum })
            }
        })
        .await
    }

    async fn delete_block(&self, block_id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/blocks/{block_id}"));
        self.with_retry("delete_block", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.delete(&url).send().await.map_err(map_send_error)?;
                let _body: DeleteBlockResponse = json_or_error(resp).await?;
                Ok(())
            }
        })
        .await
    }

    async fn block_exists(&self, block_id: &str) -> Result<bool> {
        let url = self.url(&format!("/v1/blocks/{block_id}/exists"));
        self.with_retry("block_exists", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.get(&url).send().await.map_err(map_send_error)?;
                let body: BlockExistsResponse = json_or_error(resp).await?;
                Ok(body.exists)
            }
        })
        .await
    }

    async fn list_blocks(&self) -> Result<Vec<String>> {
        let url = self.url("/v1/blocks");
        self.with_retry("list_blocks", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.get(&url).send().await.map_err(map_send_error)?;
                let body: ListBlocksResponse = json_or_error(resp).await?;
                Ok(body.block_ids)
            }
        })
        .await
    }

    async fn node_info(&self) -> Result<NodeInfoResponse> {
        let url = self.url("/v1/info");
        self.with_retry("node_info", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.get(&url).send().await.map_err(map_send_error)?;
                json_or_error(resp).await
            }
        })
        .await
    }

    async fn cleanup_orphans(&self) -> Result<usize> {
        let url = self.url("/v1/cleanup");
        self.with_retry("cleanup_orphans", || {
            let url = url.clone();
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self.http.post(&url).send().await.map_err(map_send_error)?;
                let body: CleanupResponse = json_or_error(resp).await?;
                Ok(body.removed)
            }
        })
        .await
    }

    async fn health(&self) -> Result<NodeHealthResponse> {
        // A probe is a single attempt; the monitor owns failure counting and
        // retrying here would blur its edge detection.
        let url = self.url("/v1/health");
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::transport("client shut down".to_string()))?;
        let resp = self.http.get(&url).send().await.map_err(map_send_error)?;
        json_or_error(resp).await
    }
}

impl NodeClient {
    /// Ask the node to verify a block against an expected checksum
    pub async fn verify_block(&self, block_id: &str, expected: &str) -> Result<bool> {
        let url = self.url(&format!("/v1/blocks/{block_id}/verify"));
        let request = VerifyBlockRequest {
            checksum: expected.to_string(),
        };
        self.with_retry("verify_block", || {
            let url = url.clone();
            let request = VerifyBlockRequest {
                checksum: request.checksum.clone(),
            };
            async move {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    Error::transport("client shut down".to_string())
                })?;
                let resp = self
                    .http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(map_send_error)?;
                let body: VerifyBlockResponse = json_or_error(resp).await?;
                Ok(body.valid)
            }
        })
        .await
    }
}
