//! Stripestore API - wire contract
//!
//! Request/response shapes shared by the node daemons, the coordinator's
//! transport client and the gateway. Everything is JSON except block payload
//! transfer, which travels as a binary body with the block envelope carried
//! in `x-stripestore-*` headers.

pub mod gateway;
pub mod headers;
pub mod node;

pub use gateway::*;
pub use headers::*;
pub use node::*;

use serde::{Deserialize, Serialize};

/// JSON error body used by both the node and the gateway.
///
/// Messages are user-facing: node-internal paths and backtraces never cross
/// the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
    /// Stable machine-readable code (`stripestore_common::Error::code`)
    pub code: String,
}

impl ErrorBody {
    /// Build an error body from a taxonomy error
    #[must_use]
    pub fn from_error(err: &stripestore_common::Error) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}
