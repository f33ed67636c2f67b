//! Hierarchical navigable small-world graph construction.
//!
//! The graph is a stack of proximity layers: every item lives at layer 0,
//! and each item additionally appears on all layers up to a max layer drawn
//! from an exponential distribution. Search descends from the sparse top
//! layers toward layer 0, narrowing greedily at each step.

mod builder;
mod layer;
mod params;

#[cfg(test)]
mod layer_tests;

pub use builder::GraphBuilder;
pub use params::{BuildParams, GraphPostProcessing, NeighborSelecting};

use std::cmp::Ordering;

/// Dense node identifier: the position of the item's vector in the store.
pub type NodeId = usize;

/// Distance key for the traversal heaps.
///
/// `f32` carries no `Ord`, and the candidate/frontier heaps must stay
/// consistent even when a degenerate metric produces NaN, so comparisons go
/// through the IEEE 754 total order (NaN sorts above every finite distance
/// and so gets evicted first).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dist(pub f32);

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Dist {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Dist {}

#[cfg(test)]
mod dist_tests {
    use super::Dist;
    use std::collections::BinaryHeap;

    #[test]
    fn orders_by_value() {
        assert!(Dist(1.0) < Dist(2.0));
        assert!(Dist(-1.0) < Dist(0.0));
        assert_eq!(Dist(3.5), Dist(3.5));
    }

    #[test]
    fn nan_sorts_above_infinity() {
        assert!(Dist(f32::NAN) > Dist(f32::INFINITY));
        assert!(Dist(-f32::NAN) < Dist(f32::NEG_INFINITY));
    }

    #[test]
    fn heap_pops_maximum_first() {
        let mut heap = BinaryHeap::new();
        heap.push(Dist(1.0));
        heap.push(Dist(5.0));
        heap.push(Dist(3.0));
        assert_eq!(heap.pop().unwrap().0, 5.0);
        assert_eq!(heap.pop().unwrap().0, 3.0);
        assert_eq!(heap.pop().unwrap().0, 1.0);
    }
}
