//! Stripestore Health - node liveness monitoring
//!
//! A background ticker probes every node, keeps a cached status map readable
//! without blocking foreground requests, and emits a typed event stream on
//! edge transitions: exactly one `NodeFailure` per Online→Offline and one
//! `NodeRecovery` per Offline→Online.

mod event;
mod monitor;

pub use event::HealthEvent;
pub use monitor::{AvailabilityStats, HealthMonitor, NodeState};
