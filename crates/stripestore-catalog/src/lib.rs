//! Stripestore Catalog - the coordinator's durable file index
//!
//! One JSON record per stored file, published atomically via temp-file +
//! rename. A record is written incomplete before its blocks are dispatched
//! and rewritten complete after the last stripe commits, so a coordinator
//! crash mid-write leaves a marker that startup reconciliation can drop,
//! orphaning the blocks for node-side cleanup. Readers only ever observe
//! complete records.

mod catalog;

pub use catalog::{Catalog, Reconciliation};
