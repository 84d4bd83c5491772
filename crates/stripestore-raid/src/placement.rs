//! Rotation placement
//!
//! Placement is a total function of `(stripe_index, position)` and the node
//! count. It never consults node liveness, so recovery needs nothing beyond
//! `(stripe_index, position, is_parity)` to find a block's home.

use stripestore_common::NodeId;

/// Node holding the parity member of stripe `s`: `P(s) = (s mod N) + 1`
#[must_use]
pub fn parity_node(stripe_index: u64, node_count: usize) -> NodeId {
    NodeId::new(((stripe_index % node_count as u64) as u8) + 1)
}

/// Node holding the k-th data member of stripe `s`: the k-th entry of the
/// ascending sequence `(1..=N) \ {P(s)}`.
///
/// `position` must be below `N - 1`.
#[must_use]
pub fn data_node(stripe_index: u64, position: usize, node_count: usize) -> NodeId {
    debug_assert!(position < node_count - 1);
    let parity = parity_node(stripe_index, node_count).get();
    let candidate = position as u8 + 1;
    NodeId::new(if candidate >= parity {
        candidate + 1
    } else {
        candidate
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const N: usize = 4;

    #[test]
    fn test_parity_rotates_over_stripe_index() {
        let parities: Vec<u8> = (0..8).map(|s| parity_node(s, N).get()).collect();
        assert_eq!(parities, vec![1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn test_data_nodes_skip_the_parity_node() {
        // Stripe 0: parity on node 1, data on 2, 3, 4 in order.
        assert_eq!(data_node(0, 0, N).get(), 2);
        assert_eq!(data_node(0, 1, N).get(), 3);
        assert_eq!(data_node(0, 2, N).get(), 4);
        // Stripe 2: parity on node 3, data on 1, 2, 4.
        assert_eq!(data_node(2, 0, N).get(), 1);
        assert_eq!(data_node(2, 1, N).get(), 2);
        assert_eq!(data_node(2, 2, N).get(), 4);
    }

    #[test]
    fn test_stripe_members_land_on_distinct_nodes() {
        for node_count in 3..=6usize {
            for stripe in 0..64u64 {
                let mut nodes = HashSet::new();
                nodes.insert(parity_node(stripe, node_count));
                for k in 0..node_count - 1 {
                    nodes.insert(data_node(stripe, k, node_count));
                }
                assert_eq!(
                    nodes.len(),
                    node_count,
                    "collision in stripe {stripe} of an {node_count}-node cluster"
                );
            }
        }
    }

    #[test]
    fn test_placement_ignores_everything_but_index_and_position() {
        // Same inputs, same answer: the function carries no hidden state.
        for s in 0..16 {
            for k in 0..3 {
                assert_eq!(data_node(s, k, N), data_node(s, k, N));
            }
        }
    }
}
