//! Stripestore Common - Shared types and utilities
//!
//! This crate provides the types, error definitions, checksum utilities and
//! configuration structures used across all stripestore components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::{checksum, checksums_equal, verify_checksum};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
