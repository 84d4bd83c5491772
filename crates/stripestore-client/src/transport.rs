//! The transport capability the coordinator depends on

use async_trait::async_trait;
use bytes::Bytes;
use stripestore_api::{NodeHealthResponse, NodeInfoResponse, StoreBlockResponse};
use stripestore_common::{NodeId, Result};

/// A block store request as dispatched to one node
#[derive(Clone, Debug)]
pub struct StoreBlock {
    /// Canonical block id string
    pub block_id: String,
    /// Payload bytes (uncompressed)
    pub data: Bytes,
    /// SHA-256 hex of the payload
    pub checksum: String,
    /// Stripe index hint
    pub stripe_index: u64,
    /// Position-within-stripe hint
    pub position: u8,
    /// Whether this is the stripe's parity member
    pub is_parity: bool,
}

/// A retrieved block with the node's view of its checksum
#[derive(Clone, Debug)]
pub struct RetrievedBlock {
    pub data: Bytes,
    pub checksum: String,
}

/// The Block Store contract plus a health probe, as seen over the wire.
///
/// The coordinator and the health monitor depend on this capability, not on
/// the HTTP client, so tests can stand up an in-memory fleet.
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// The node this transport is bound to
    fn node_id(&self) -> NodeId;

    /// Store a block on the node
    async fn store_block(&self, request: &StoreBlock) -> Result<StoreBlockResponse>;

    /// Retrieve a block's bytes
    async fn retrieve_block(&self, block_id: &str) -> Result<RetrievedBlock>;

    /// Delete a block; absence surfaces as `BlockNotFound`
    async fn delete_block(&self, block_id: &str) -> Result<()>;

    /// Presence-only probe
    async fn block_exists(&self, block_id: &str) -> Result<bool>;

    /// List all block ids stored on the node
    async fn list_blocks(&self) -> Result<Vec<String>>;

    /// Storage totals and block counts
    async fn node_info(&self) -> Result<NodeInfoResponse>;

    /// Ask the node to reap orphaned artifacts
    async fn cleanup_orphans(&self) -> Result<usize>;

    /// Liveness probe
    async fn health(&self) -> Result<NodeHealthResponse>;
}
