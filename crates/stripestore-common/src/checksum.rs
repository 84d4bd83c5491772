//! Checksum utilities for stripestore
//!
//! The integrity contract across the whole system is SHA-256 in lowercase
//! hex. Comparison is case-insensitive; any other format fails verification.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 checksum of `data` as a lowercase hex string
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify `data` against an expected SHA-256 hex checksum.
///
/// Hex case is not significant.
#[must_use]
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    checksums_equal(&checksum(data), expected)
}

/// Case-insensitive comparison of two hex checksum strings
#[must_use]
pub fn checksums_equal(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_stable() {
        let data = b"hello, world!";
        assert_eq!(checksum(data), checksum(data));
        assert_eq!(checksum(data).len(), 64);
        assert!(checksum(data).chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_case_insensitive() {
        let data = b"hello, world!";
        let sum = checksum(data);
        assert!(verify_checksum(data, &sum));
        assert!(verify_checksum(data, &sum.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_corruption() {
        let data = b"hello, world!".to_vec();
        let sum = checksum(&data);

        // Flip one bit in every byte position; each corruption must be caught.
        for i in 0..data.len() {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            assert!(!verify_checksum(&corrupted, &sum), "flip at byte {i} missed");
        }
    }

    #[test]
    fn test_verify_rejects_foreign_formats() {
        let data = b"hello, world!";
        assert!(!verify_checksum(data, "MOCK_checksum_value"));
        assert!(!verify_checksum(data, ""));
        assert!(!verify_checksum(data, "abcd"));
    }
}
