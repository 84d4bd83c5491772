//! Header names for the binary block-transfer envelope.
//!
//! Block payloads are binary bodies; the request metadata that would
//! otherwise live in a JSON envelope rides in these headers instead.

/// SHA-256 hex checksum of the (uncompressed) payload
pub const HDR_CHECKSUM: &str = "x-stripestore-checksum";
/// Stripe index hint
pub const HDR_STRIPE_INDEX: &str = "x-stripestore-stripe";
/// Position-within-stripe hint
pub const HDR_POSITION: &str = "x-stripestore-position";
/// "true" when the block is a stripe's parity member
pub const HDR_PARITY: &str = "x-stripestore-parity";
/// Caller-assigned request id, echoed in node logs
pub const HDR_REQUEST_ID: &str = "x-stripestore-request-id";
/// File name for gateway uploads
pub const HDR_FILE_NAME: &str = "x-stripestore-file-name";
