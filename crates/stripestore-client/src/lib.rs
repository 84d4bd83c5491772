//! Stripestore Client - node transport
//!
//! The coordinator talks to every node through the [`BlockTransport`]
//! capability. [`NodeClient`] is the HTTP implementation: fixed-delay retry,
//! per-operation timeouts, a bounded in-flight cap and optional gzip for
//! large payloads. [`NodePool`] shares clients per endpoint with race-safe
//! creation.
//!
//! Policy is immutable after construction; changing timeouts or retry
//! settings means building a new client, never mutating a shared one.

mod http;
mod policy;
mod pool;
mod transport;

pub use http::NodeClient;
pub use policy::TransportPolicy;
pub use pool::NodePool;
pub use transport::{BlockTransport, RetrievedBlock, StoreBlock};
