//! Transport policy

use std::time::Duration;
use stripestore_common::config::TransportConfig;

/// Retry, timeout and compression settings for a node client.
///
/// A policy is fixed at client construction. Pool entries created earlier
/// keep the policy they were built with.
#[derive(Clone, Debug)]
pub struct TransportPolicy {
    /// Per-operation timeout
    pub request_timeout: Duration,
    /// Retries after the initial attempt on transport-class failures
    pub max_retry_attempts: u32,
    /// Fixed wait between retries
    pub retry_delay: Duration,
    /// Whether to gzip store payloads above the threshold
    pub compression_enabled: bool,
    /// Minimum payload size before compression kicks in
    pub compression_threshold: usize,
    /// In-flight request cap per node
    pub max_connections_per_server: usize,
}

impl TransportPolicy {
    /// Build a policy from the transport section of the configuration
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_retry_attempts: config.max_retry_attempts,
            retry_delay: config.retry_delay(),
            compression_enabled: config.compression_enabled,
            compression_threshold: config.compression_threshold,
            max_connections_per_server: config.max_connections_per_server,
        }
    }
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
