//! Byte-wise XOR over stripe members.
//!
//! XOR is commutative and associative, so member order never affects the
//! result. Short members contribute zeroes past their end; the last stripe of
//! a file is usually partial, so the padding case is the common case.

use stripestore_common::Error;
use thiserror::Error;

/// Errors surfaced by the parity engine
#[derive(Debug, Error)]
pub enum ParityError {
    #[error("parity input is empty")]
    EmptyInput,
}

impl From<ParityError> for Error {
    fn from(e: ParityError) -> Self {
        Error::Validation(e.to_string())
    }
}

/// Compute the parity member for a set of data blocks.
///
/// The result has the length of the longest member; at every byte position it
/// is the XOR of all members, where a member shorter than the position
/// contributes zero. Fails only when `data_blocks` is empty.
pub fn compute_parity<B: AsRef<[u8]>>(data_blocks: &[B]) -> Result<Vec<u8>, ParityError> {
    if data_blocks.is_empty() {
        return Err(ParityError::EmptyInput);
    }
    let len = data_blocks
        .iter()
        .map(|b| b.as_ref().len())
        .max()
        .unwrap_or(0);
    let mut parity = vec![0u8; len];
    for block in data_blocks {
        xor_into(&mut parity, block.as_ref());
    }
    Ok(parity)
}

/// Reconstruct a missing stripe member from the survivors and the parity.
///
/// Returns `parity XOR (XOR of surviving members)` at parity length. The
/// caller must supply exactly the D-1 surviving data members plus the parity
/// for that stripe; the engine cannot detect a violated precondition and
/// will produce garbage for one.
#[must_use]
pub fn recover_block<B: AsRef<[u8]>>(surviving: &[B], parity: &[u8]) -> Vec<u8> {
    let mut out = parity.to_vec();
    for block in surviving {
        xor_into(&mut out, block.as_ref());
    }
    out
}

/// Check that `parity` is the parity of `data_blocks`, byte for byte
#[must_use]
pub fn verify_parity<B: AsRef<[u8]>>(data_blocks: &[B], parity: &[u8]) -> bool {
    match compute_parity(data_blocks) {
        Ok(computed) => computed == parity,
        Err(_) => false,
    }
}

fn xor_into(acc: &mut [u8], block: &[u8]) {
    for (a, b) in acc.iter_mut().zip(block.iter()) {
        *a ^= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Deterministic bytes for property-style coverage without an RNG dep.
    fn pseudo_random(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xff) as u8
            })
            .collect()
    }

    #[test]
    fn test_empty_input_rejected() {
        let blocks: Vec<Vec<u8>> = Vec::new();
        assert!(matches!(
            compute_parity(&blocks),
            Err(ParityError::EmptyInput)
        ));
    }

    #[test]
    fn test_parity_length_is_max_member_length() {
        let blocks: Vec<&[u8]> = vec![b"ab", b"abcdef", b"a"];
        let parity = compute_parity(&blocks).unwrap();
        assert_eq!(parity.len(), 6);
    }

    #[test]
    fn test_single_member_parity_equals_member() {
        let block = pseudo_random(7, 100);
        let parity = compute_parity(std::slice::from_ref(&block)).unwrap();
        assert_eq!(parity, block);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = pseudo_random(1, 64);
        let b = pseudo_random(2, 40);
        let c = pseudo_random(3, 64);
        let p1 = compute_parity(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let p2 = compute_parity(&[c, a, b]).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_recover_any_single_member() {
        // Arbitrary, uneven lengths: the recover-any-one property must hold
        // with zero padding to the parity length.
        for seed in 0..8u64 {
            let lens = [
                1 + (seed as usize * 37) % 300,
                1 + (seed as usize * 91) % 200,
                1 + (seed as usize * 13) % 257,
            ];
            let blocks: Vec<Vec<u8>> = lens
                .iter()
                .enumerate()
                .map(|(i, &l)| pseudo_random(seed * 10 + i as u64, l))
                .collect();
            let parity = compute_parity(&blocks).unwrap();

            for missing in 0..blocks.len() {
                let survivors: Vec<&Vec<u8>> = blocks
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != missing)
                    .map(|(_, b)| b)
                    .collect();
                let recovered = recover_block(&survivors, &parity);
                assert_eq!(recovered.len(), parity.len());
                assert_eq!(&recovered[..blocks[missing].len()], &blocks[missing][..]);
                // Padding beyond the original member must be zero.
                assert!(recovered[blocks[missing].len()..].iter().all(|&b| b == 0));
            }
        }
    }

    #[test]
    fn test_verify_parity() {
        let blocks: Vec<Vec<u8>> =
            vec![pseudo_random(4, 80), pseudo_random(5, 80), pseudo_random(6, 33)];
        let parity = compute_parity(&blocks).unwrap();
        assert!(verify_parity(&blocks, &parity));

        let mut corrupted = parity.clone();
        corrupted[0] ^= 0xff;
        assert!(!verify_parity(&blocks, &corrupted));

        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(!verify_parity(&empty, &parity));
    }

    #[test]
    fn test_zero_length_members() {
        let blocks: Vec<&[u8]> = vec![b"", b"xy", b""];
        let parity = compute_parity(&blocks).unwrap();
        assert_eq!(parity, b"xy");
    }
}
