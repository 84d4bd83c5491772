//! Shared node-client pool
//!
//! One `NodeClient` per endpoint, keyed by the normalized base URL
//! (scheme + host + port). Creation is race-safe: the first caller builds
//! the client, later callers reuse it. Entries keep the policy they were
//! built with; a new policy only affects clients created afterwards.

use crate::http::NodeClient;
use crate::policy::TransportPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use stripestore_common::{NodeId, Result};
use tokio::sync::RwLock;
use tracing::info;

/// Pool of node clients for multi-node operations
pub struct NodePool {
    policy: TransportPolicy,
    clients: RwLock<HashMap<String, Arc<NodeClient>>>,
}

impl NodePool {
    /// Create an empty pool bound to one transport policy
    #[must_use]
    pub fn new(policy: TransportPolicy) -> Self {
        Self {
            policy,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the client for `endpoint`, creating it on first use
    pub async fn get_or_create(&self, node_id: NodeId, endpoint: &str) -> Result<Arc<NodeClient>> {
        let key = normalize(endpoint);

        // Fast path: already built.
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        // Double-check: another task may have built it while we waited.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = Arc::new(NodeClient::new(node_id, &key, self.policy.clone())?);
        clients.insert(key.clone(), client.clone());
        info!(node = %node_id, endpoint = %key, "created node client");
        Ok(client)
    }

    /// Number of clients currently pooled
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the pool has no clients yet
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

fn normalize(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_reuses_clients() {
        let pool = NodePool::new(TransportPolicy::default());
        let a = pool
            .get_or_create(NodeId::new(1), "http://127.0.0.1:7101")
            .await
            .unwrap();
        let b = pool
            .get_or_create(NodeId::new(1), "http://127.0.0.1:7101/")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_pool_separates_endpoints() {
        let pool = NodePool::new(TransportPolicy::default());
        pool.get_or_create(NodeId::new(1), "http://127.0.0.1:7101")
            .await
            .unwrap();
        pool.get_or_create(NodeId::new(2), "http://127.0.0.1:7102")
            .await
            .unwrap();
        assert_eq!(pool.len().await, 2);
    }
}
