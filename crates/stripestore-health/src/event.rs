//! Health event stream types

use chrono::{DateTime, Utc};
use std::time::Duration;
use stripestore_common::NodeId;

/// Edge-transition events emitted by the health monitor.
///
/// Observers subscribe once and receive events in emission order; emission
/// is serialized per node, so a failure and the matching recovery can never
/// arrive swapped.
#[derive(Clone, Debug)]
pub enum HealthEvent {
    /// A node transitioned Online → Offline
    NodeFailure {
        node_id: NodeId,
        /// The probe error that tripped the transition
        reason: String,
        /// Last successful heartbeat before the failure, if any
        last_known: Option<DateTime<Utc>>,
    },
    /// A node transitioned Offline → Online
    NodeRecovery {
        node_id: NodeId,
        /// How long the node was offline
        downtime: Duration,
    },
}

impl HealthEvent {
    /// The node this event concerns
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::NodeFailure { node_id, .. } | Self::NodeRecovery { node_id, .. } => *node_id,
        }
    }
}
