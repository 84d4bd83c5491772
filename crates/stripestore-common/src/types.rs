//! Core type definitions for stripestore
//!
//! Identifiers, block descriptors, file records and the status enums shared
//! between the coordinator, the health monitor and the node daemons.

use chrono::{DateTime, Utc};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a storage node.
///
/// Node ids are small integers in `[1..=N]`, assigned in configuration and
/// never reused at runtime.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
)]
pub struct NodeId(u8);

impl NodeId {
    /// Create a node id from its configured integer value
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Get the underlying integer
    #[must_use]
    pub const fn get(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stored file
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity of a block within the cluster.
///
/// The canonical string form is `<fileId>:s=<stripeIndex>:k=<position>:<d|p>`
/// where `position` is `0..D-1` for data members and the sentinel `D` for the
/// parity member. The string form doubles as the storage key on the node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Owning file
    pub file_id: FileId,
    /// Stripe this block belongs to (0-indexed)
    pub stripe_index: u64,
    /// Position within the stripe
    pub position: u8,
    /// Whether this is the stripe's parity member
    pub is_parity: bool,
}

impl BlockId {
    /// Block id for a data member
    #[must_use]
    pub const fn data(file_id: FileId, stripe_index: u64, position: u8) -> Self {
        Self {
            file_id,
            stripe_index,
            position,
            is_parity: false,
        }
    }

    /// Block id for the parity member; `sentinel` is the stripe data width D
    #[must_use]
    pub const fn parity(file_id: FileId, stripe_index: u64, sentinel: u8) -> Self {
        Self {
            file_id,
            stripe_index,
            position: sentinel,
            is_parity: true,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:s={}:k={}:{}",
            self.file_id,
            self.stripe_index,
            self.position,
            if self.is_parity { "p" } else { "d" }
        )
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// Error produced when parsing a block id string
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockIdError {
    #[error("block id has wrong number of segments")]
    Malformed,
    #[error("invalid file id in block id: {0}")]
    FileId(String),
    #[error("invalid stripe index in block id")]
    StripeIndex,
    #[error("invalid position in block id")]
    Position,
    #[error("invalid kind marker in block id (expected d or p)")]
    Kind,
}

impl FromStr for BlockId {
    type Err = BlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(BlockIdError::Malformed);
        }
        let file_id = parts[0]
            .parse::<FileId>()
            .map_err(|e| BlockIdError::FileId(e.to_string()))?;
        let stripe_index = parts[1]
            .strip_prefix("s=")
            .ok_or(BlockIdError::Malformed)?
            .parse::<u64>()
            .map_err(|_| BlockIdError::StripeIndex)?;
        let position = parts[2]
            .strip_prefix("k=")
            .ok_or(BlockIdError::Malformed)?
            .parse::<u8>()
            .map_err(|_| BlockIdError::Position)?;
        let is_parity = match parts[3] {
            "d" => false,
            "p" => true,
            _ => return Err(BlockIdError::Kind),
        };
        Ok(Self {
            file_id,
            stripe_index,
            position,
            is_parity,
        })
    }
}

/// The coordinator's descriptor for one stored block.
///
/// The coordinator only ever holds descriptors; the bytes live on exactly one
/// node and are fetched on demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Node that owns the block
    pub node_id: NodeId,
    /// Cluster-wide block identity (canonical string form)
    pub block_id: String,
    /// Payload length in bytes
    pub size: u64,
    /// SHA-256 of the payload, lowercase hex
    pub checksum: String,
    /// Stripe the block belongs to
    pub stripe_index: u64,
    /// Position within the stripe (sentinel D for parity)
    pub position: u8,
    /// Whether this is the stripe's parity member
    pub is_parity: bool,
}

/// Catalog record for one stored file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique file id
    pub file_id: FileId,
    /// User-visible file name, unique case-insensitively
    pub file_name: String,
    /// Declared size in bytes
    pub size: u64,
    /// Content type supplied at upload
    pub content_type: String,
    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,
    /// All block descriptors, data first in file order, parity tagged
    pub blocks: Vec<BlockRef>,
    /// Set once every stripe has committed and the record is published
    pub complete: bool,
}

impl FileRecord {
    /// Data block descriptors in `(stripe, position)` order
    pub fn data_blocks(&self) -> impl Iterator<Item = &BlockRef> {
        self.blocks.iter().filter(|b| !b.is_parity)
    }

    /// Parity block descriptors in stripe order
    pub fn parity_blocks(&self) -> impl Iterator<Item = &BlockRef> {
        self.blocks.iter().filter(|b| b.is_parity)
    }

    /// Number of stripes the file spans
    #[must_use]
    pub fn stripe_count(&self) -> u64 {
        self.blocks
            .iter()
            .map(|b| b.stripe_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Distinct nodes holding at least one block of this file
    #[must_use]
    pub fn nodes_used(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.blocks.iter().map(|b| b.node_id).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

/// Liveness opinion the health monitor keeps per node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Never probed
    #[default]
    Unknown,
    /// Last probe succeeded
    Online,
    /// Last probe failed
    Offline,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Cluster-level status derived from the online node count
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    /// Every node online; writes and reads both available
    Operational,
    /// At least one node down but reads can still reconstruct
    Degraded,
    /// Too few nodes for any recovery guarantee
    Critical,
}

impl SystemStatus {
    /// Derive the cluster status from the online count.
    ///
    /// One failed node already degrades the cluster: writes require all N
    /// members, and a second failure would make stripes unrecoverable.
    #[must_use]
    pub fn derive(online: usize, total: usize) -> Self {
        if online >= total {
            Self::Operational
        } else if online >= 2 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operational => write!(f, "operational"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_roundtrip() {
        let file_id = FileId::new();
        let id = BlockId::data(file_id, 7, 2);
        let parsed: BlockId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let parity = BlockId::parity(file_id, 0, 3);
        let s = parity.to_string();
        assert!(s.ends_with(":p"));
        assert_eq!(s.parse::<BlockId>().unwrap(), parity);
    }

    #[test]
    fn test_block_id_rejects_garbage() {
        assert!("not-a-block-id".parse::<BlockId>().is_err());
        assert!("a:b:c".parse::<BlockId>().is_err());
        let file_id = FileId::new();
        assert!(format!("{file_id}:s=0:k=0:x").parse::<BlockId>().is_err());
        assert!(format!("{file_id}:s=x:k=0:d").parse::<BlockId>().is_err());
    }

    #[test]
    fn test_file_record_helpers() {
        let file_id = FileId::new();
        let mk = |stripe: u64, pos: u8, parity: bool, node: u8| BlockRef {
            node_id: NodeId::new(node),
            block_id: if parity {
                BlockId::parity(file_id, stripe, 3).to_string()
            } else {
                BlockId::data(file_id, stripe, pos).to_string()
            },
            size: 100,
            checksum: String::new(),
            stripe_index: stripe,
            position: pos,
            is_parity: parity,
        };
        let record = FileRecord {
            file_id,
            file_name: "report.pdf".into(),
            size: 300,
            content_type: "application/pdf".into(),
            uploaded_at: Utc::now(),
            blocks: vec![
                mk(0, 0, false, 2),
                mk(0, 1, false, 3),
                mk(0, 2, false, 4),
                mk(0, 3, true, 1),
            ],
            complete: true,
        };
        assert_eq!(record.data_blocks().count(), 3);
        assert_eq!(record.parity_blocks().count(), 1);
        assert_eq!(record.stripe_count(), 1);
        assert_eq!(
            record.nodes_used(),
            vec![NodeId::new(1), NodeId::new(2), NodeId::new(3), NodeId::new(4)]
        );
    }

    #[test]
    fn test_system_status_derivation() {
        assert_eq!(SystemStatus::derive(4, 4), SystemStatus::Operational);
        assert_eq!(SystemStatus::derive(3, 4), SystemStatus::Degraded);
        assert_eq!(SystemStatus::derive(2, 4), SystemStatus::Degraded);
        assert_eq!(SystemStatus::derive(1, 4), SystemStatus::Critical);
        assert_eq!(SystemStatus::derive(0, 4), SystemStatus::Critical);
    }
}
