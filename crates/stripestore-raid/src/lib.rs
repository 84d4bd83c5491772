//! Stripestore RAID - the coordinator core
//!
//! Splits files into fixed-size blocks, groups them into stripes of D = N-1
//! data members plus one XOR parity member, places the D+1 members on D+1
//! distinct nodes by a rotation that is a pure function of the stripe index,
//! and reconstructs any single missing or corrupt member from parity on the
//! read path.

mod coordinator;
mod placement;
mod plan;

pub use coordinator::{RaidCoordinator, UploadOutcome};
pub use placement::{data_node, parity_node};
pub use plan::{plan_stripes, BlockPlan, StripePlan};
