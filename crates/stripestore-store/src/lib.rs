//! Stripestore Store - per-node block persistence
//!
//! Each block is stored as two artifacts: the raw payload (`<id>.blk`) and a
//! JSON sidecar (`<id>.meta`) holding size, checksum and creation time. A
//! retrieve recomputes the payload checksum against the sidecar; a mismatch
//! surfaces as an integrity failure, never as silently corrupt bytes.

mod store;

pub use store::{BlockSidecar, BlockStore, StoredBlock};
