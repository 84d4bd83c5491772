//! Stripe planning
//!
//! A file of L bytes with block size B becomes ⌈L/B⌉ data blocks in file
//! order, grouped into stripes of D = N-1 contiguous blocks. The last block
//! and the last stripe may both be short; a short stripe simply has fewer
//! data members, and its parity covers only the members that exist.

use crate::placement::{data_node, parity_node};
use stripestore_common::NodeId;

/// One planned data block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPlan {
    /// Position within the stripe, `0..D-1`
    pub position: u8,
    /// Home node per the rotation rule
    pub node_id: NodeId,
    /// Byte offset into the file
    pub offset: usize,
    /// Block length (the final block may be short)
    pub len: usize,
}

/// One planned stripe
#[derive(Clone, Debug)]
pub struct StripePlan {
    /// Stripe index, 0-based
    pub index: u64,
    /// Home node of the parity member
    pub parity_node: NodeId,
    /// Data members in position order
    pub data: Vec<BlockPlan>,
}

/// Plan the stripes for a file of `file_len` bytes
#[must_use]
pub fn plan_stripes(file_len: usize, block_size: usize, node_count: usize) -> Vec<StripePlan> {
    let data_width = node_count - 1;
    let block_count = file_len.div_ceil(block_size);

    let mut stripes = Vec::with_capacity(block_count.div_ceil(data_width));
    for (stripe_index, chunk) in (0..block_count).collect::<Vec<_>>().chunks(data_width).enumerate() {
        let stripe_index = stripe_index as u64;
        let data = chunk
            .iter()
            .enumerate()
            .map(|(position, &block_index)| {
                let offset = block_index * block_size;
                BlockPlan {
                    position: position as u8,
                    node_id: data_node(stripe_index, position, node_count),
                    offset,
                    len: block_size.min(file_len - offset),
                }
            })
            .collect();
        stripes.push(StripePlan {
            index: stripe_index,
            parity_node: parity_node(stripe_index, node_count),
            data,
        });
    }
    stripes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiple() {
        let stripes = plan_stripes(6 * 1024, 1024, 4);
        assert_eq!(stripes.len(), 2);
        assert_eq!(stripes[0].data.len(), 3);
        assert_eq!(stripes[1].data.len(), 3);
        assert!(stripes.iter().flat_map(|s| &s.data).all(|b| b.len == 1024));
    }

    #[test]
    fn test_short_tail_block_and_stripe() {
        // 200000 bytes at 64 KiB: 4 blocks, stripe 0 full, stripe 1 with one
        // short block.
        let stripes = plan_stripes(200_000, 65_536, 4);
        assert_eq!(stripes.len(), 2);
        assert_eq!(stripes[0].data.len(), 3);
        assert_eq!(stripes[1].data.len(), 1);
        assert_eq!(stripes[1].data[0].len, 200_000 - 3 * 65_536);
        assert_eq!(stripes[1].data[0].offset, 3 * 65_536);
    }

    #[test]
    fn test_single_byte_file() {
        let stripes = plan_stripes(1, 65_536, 4);
        assert_eq!(stripes.len(), 1);
        assert_eq!(stripes[0].data.len(), 1);
        assert_eq!(stripes[0].data[0].len, 1);
        assert_eq!(stripes[0].parity_node.get(), 1);
        assert_eq!(stripes[0].data[0].node_id.get(), 2);
    }

    #[test]
    fn test_offsets_cover_the_file_exactly() {
        let file_len = 10 * 1024 + 17;
        let stripes = plan_stripes(file_len, 1024, 4);
        let mut expected_offset = 0;
        for block in stripes.iter().flat_map(|s| &s.data) {
            assert_eq!(block.offset, expected_offset);
            expected_offset += block.len;
        }
        assert_eq!(expected_offset, file_len);
    }

    #[test]
    fn test_empty_file_plans_nothing() {
        assert!(plan_stripes(0, 1024, 4).is_empty());
    }
}
