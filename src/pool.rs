//! Reusable search scratch: the two heaps and the visited set every layer
//! search needs.
//!
//! Beam search allocates a worklist heap (max-heap, nearest candidate popped
//! first), a results heap (min-heap, worst result on top for O(1) eviction)
//! and a visited set on every call. The pool checks a scratch out per search
//! call and takes it back afterwards so repeated searches reuse the
//! allocations. The pool mutex is an allocation cache only; it plays no part
//! in the engine's single-writer contract.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::types::NodeId;

/// Scored candidate. Natural ordering is by score ascending, so a
/// `BinaryHeap<Scored>` pops the highest score first and a
/// `BinaryHeap<Reverse<Scored>>` pops the lowest. Ties break toward the
/// lower id for deterministic results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scored {
    pub score: f32,
    pub id: NodeId,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Sort by (score desc, id asc).
pub(crate) fn sort_descending(items: &mut [Scored]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Per-search working state.
#[derive(Default)]
pub(crate) struct SearchScratch {
    /// Worklist: nearest unexpanded candidate on top.
    pub candidates: BinaryHeap<Scored>,
    /// Dynamic result list: worst kept result on top.
    pub results: BinaryHeap<Reverse<Scored>>,
    pub visited: FxHashSet<NodeId>,
}

impl SearchScratch {
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.results.clear();
        self.visited.clear();
    }
}

/// Pool keeps at most this many idle scratches around.
const POOL_LIMIT: usize = 8;

/// Checkout/return pool of [`SearchScratch`] values.
#[derive(Default)]
pub(crate) struct ScratchPool {
    idle: Mutex<Vec<SearchScratch>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkout(&self) -> SearchScratch {
        self.idle.lock().pop().unwrap_or_default()
    }

    pub fn restore(&self, mut scratch: SearchScratch) {
        scratch.reset();
        let mut idle = self.idle.lock();
        if idle.len() < POOL_LIMIT {
            idle.push(scratch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_heap_order() {
        let mut heap = BinaryHeap::new();
        heap.push(Scored { score: 0.1, id: 3 });
        heap.push(Scored { score: 0.9, id: 1 });
        heap.push(Scored { score: 0.5, id: 2 });
        assert_eq!(heap.pop().map(|s| s.id), Some(1));
        assert_eq!(heap.pop().map(|s| s.id), Some(2));
        assert_eq!(heap.pop().map(|s| s.id), Some(3));
    }

    #[test]
    fn test_tie_breaks_toward_lower_id() {
        let mut heap = BinaryHeap::new();
        heap.push(Scored { score: 0.5, id: 9 });
        heap.push(Scored { score: 0.5, id: 2 });
        assert_eq!(heap.pop().map(|s| s.id), Some(2));
    }

    #[test]
    fn test_sort_descending() {
        let mut v = vec![
            Scored { score: 0.2, id: 5 },
            Scored { score: 0.8, id: 1 },
            Scored { score: 0.8, id: 0 },
        ];
        sort_descending(&mut v);
        assert_eq!(v.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 1, 5]);
    }

    #[test]
    fn test_pool_reuses_scratch() {
        let pool = ScratchPool::new();
        let mut scratch = pool.checkout();
        scratch.candidates.push(Scored { score: 1.0, id: 1 });
        scratch.visited.insert(1);
        pool.restore(scratch);

        let scratch = pool.checkout();
        assert!(scratch.candidates.is_empty());
        assert!(scratch.visited.is_empty());
    }
}
