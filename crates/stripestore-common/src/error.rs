//! Error types for stripestore
//!
//! This module defines the common error taxonomy used throughout the system.

use crate::types::NodeId;
use thiserror::Error;

/// Common result type for stripestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for stripestore
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors (client class, never retried)
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid block id: {0}")]
    InvalidBlockId(String),

    // Not-found errors (never retried)
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    // Transport errors (retried per policy)
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timeout")]
    Timeout,

    #[error("node {node_id} unavailable: {reason}")]
    NodeUnavailable { node_id: NodeId, reason: String },

    // Storage errors
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("insufficient space: required {required} bytes, available {available} bytes")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("storage failure: {0}")]
    StorageFailure(String),

    // Read-path fatals
    #[error("stripe {stripe_index} lost {missing} members, cannot reconstruct")]
    UnrecoverableLoss { stripe_index: u64, missing: usize },

    // Cluster state
    #[error("service degraded: {0}")]
    ServiceDegraded(String),

    // Startup
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a storage failure
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    /// Check if the transport policy may retry this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// Check if this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::BlockNotFound(_))
    }

    /// Stable machine-readable code used in JSON error bodies
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidBlockId(_) => "validation_error",
            Self::FileNotFound(_) | Self::BlockNotFound(_) => "not_found",
            Self::Transport(_) | Self::Timeout => "transport_error",
            Self::NodeUnavailable { .. } => "node_unavailable",
            Self::Integrity { .. } => "integrity_failure",
            Self::InsufficientSpace { .. } => "insufficient_space",
            Self::Io(_) | Self::StorageFailure(_) => "storage_failure",
            Self::UnrecoverableLoss { .. } => "unrecoverable_loss",
            Self::ServiceDegraded(_) => "service_degraded",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Serialization(_) => "internal_error",
        }
    }

    /// HTTP status code carried on the wire for this error.
    ///
    /// Integrity failures map to 422 rather than a 5xx so the retry policy
    /// treats them as non-retryable and the read path can demote the block to
    /// missing immediately. Insufficient space maps to 507 for the same
    /// reason: the write path aborts, it does not retry.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidBlockId(_) => 400,
            Self::FileNotFound(_) | Self::BlockNotFound(_) => 404,
            Self::Integrity { .. } => 422,
            Self::InsufficientSpace { .. } => 507,
            Self::Transport(_) | Self::Timeout | Self::NodeUnavailable { .. } => 503,
            Self::ServiceDegraded(_) => 503,
            Self::UnrecoverableLoss { .. } => 500,
            Self::Io(_)
            | Self::StorageFailure(_)
            | Self::Serialization(_)
            | Self::InvalidConfig(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::transport("connection refused").is_retryable());
        assert!(!Error::validation("empty name").is_retryable());
        assert!(!Error::Integrity("expected aa, got bb".into()).is_retryable());
        assert!(!Error::InsufficientSpace {
            required: 10,
            available: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::FileNotFound("a.pdf".into()).is_not_found());
        assert!(Error::BlockNotFound("x:s=0:k=0:d".into()).is_not_found());
        assert!(!Error::Timeout.is_not_found());
    }

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::validation("bad").http_status_code(), 400);
        assert_eq!(Error::FileNotFound("a".into()).http_status_code(), 404);
        assert_eq!(
            Error::Integrity("expected aa, got bb".into()).http_status_code(),
            422
        );
        assert_eq!(
            Error::InsufficientSpace {
                required: 10,
                available: 1
            }
            .http_status_code(),
            507
        );
        assert_eq!(Error::Timeout.http_status_code(), 503);
    }
}
