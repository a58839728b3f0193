//! A single indexed vector plus its graph adjacency.
//!
//! Neighbor lists are fixed-capacity slot arrays, one per level the node
//! participates in, padded with [`EMPTY_SLOT`]. Slots only ever hold ids of
//! nodes that existed at assignment time; they may transiently point at
//! now-deleted nodes until a pruning pass rewrites them.
//!
//! The derived values (magnitude, normalized form) are computed lazily and
//! follow an explicit invalidate-on-write contract: [`VectorNode::set_vector`]
//! is the only way to mutate the vector, and it drops both cached fields.

use once_cell::sync::OnceCell;
use smallvec::SmallVec;

use crate::distance::l2_norm;
use crate::types::{NodeId, EMPTY_SLOT};

/// Per-level neighbor slot array. Inline up to the default M of 16.
type SlotArray = SmallVec<[NodeId; 16]>;

/// A single indexed vector with per-level adjacency and a tombstone flag.
#[derive(Debug)]
pub struct VectorNode {
    pub id: NodeId,
    vector: Vec<f32>,
    /// Highest level this node participates in. Immutable after creation.
    pub level: usize,
    /// `neighbors[l]` is the slot array for level `l`, length == M.
    neighbors: Vec<SlotArray>,
    /// Soft-delete tombstone. Search skips tombstoned nodes; pruning removes
    /// them physically.
    pub deleted: bool,
    magnitude: OnceCell<f32>,
    normalized: OnceCell<Vec<f32>>,
}

impl VectorNode {
    /// Create a node with empty slot arrays of capacity `m` for levels
    /// `0..=level`.
    pub fn new(id: NodeId, vector: Vec<f32>, level: usize, m: usize) -> Self {
        let neighbors = (0..=level)
            .map(|_| SlotArray::from_elem(EMPTY_SLOT, m))
            .collect();
        Self {
            id,
            vector,
            level,
            neighbors,
            deleted: false,
            magnitude: OnceCell::new(),
            normalized: OnceCell::new(),
        }
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Replace the vector in place, invalidating the cached derived values.
    /// Graph adjacency is untouched.
    pub fn set_vector(&mut self, vector: Vec<f32>) {
        self.vector = vector;
        self.magnitude = OnceCell::new();
        self.normalized = OnceCell::new();
    }

    /// L2 norm of the vector, computed on first use.
    pub fn magnitude(&self) -> f32 {
        *self.magnitude.get_or_init(|| l2_norm(&self.vector))
    }

    /// Unit-length form of the vector, computed on first use. Zero vectors
    /// yield themselves unchanged.
    pub fn normalized(&self) -> &[f32] {
        self.normalized.get_or_init(|| {
            let norm = self.magnitude();
            if norm == 0.0 {
                self.vector.clone()
            } else {
                self.vector.iter().map(|x| x / norm).collect()
            }
        })
    }

    /// Number of levels this node has slot arrays for (level + 1).
    pub fn level_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Raw slot array at `level`, sentinel padding included. Empty slice if
    /// the node does not participate in `level`.
    pub fn slots(&self, level: usize) -> &[NodeId] {
        self.neighbors.get(level).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// Live neighbor ids at `level` (sentinel slots filtered out).
    pub fn neighbors(&self, level: usize) -> impl Iterator<Item = NodeId> + '_ {
        self.slots(level).iter().copied().filter(|&id| id != EMPTY_SLOT)
    }

    pub fn has_neighbor(&self, level: usize, id: NodeId) -> bool {
        self.slots(level).contains(&id)
    }

    /// Place `id` in the first empty slot at `level`. Returns false when the
    /// slot array is full (the caller must then prune) or the id is already
    /// present.
    pub fn add_neighbor(&mut self, level: usize, id: NodeId) -> bool {
        let Some(slots) = self.neighbors.get_mut(level) else {
            return false;
        };
        if slots.contains(&id) {
            return false;
        }
        match slots.iter_mut().find(|slot| **slot == EMPTY_SLOT) {
            Some(slot) => {
                *slot = id;
                true
            }
            None => false,
        }
    }

    /// Overwrite the slot array at `level` with `ids`, truncated to capacity
    /// and re-padded with the empty sentinel.
    pub fn set_neighbors(&mut self, level: usize, ids: &[NodeId]) {
        let Some(slots) = self.neighbors.get_mut(level) else {
            return;
        };
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = ids.get(i).copied().unwrap_or(EMPTY_SLOT);
        }
    }

    /// Drop every neighbor id for which `keep` returns false, compacting the
    /// survivors to the front and re-padding with the sentinel.
    pub fn retain_neighbors(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        for slots in &mut self.neighbors {
            let kept: SlotArray = slots
                .iter()
                .copied()
                .filter(|&id| id != EMPTY_SLOT && keep(id))
                .collect();
            for (i, slot) in slots.iter_mut().enumerate() {
                *slot = kept.get(i).copied().unwrap_or(EMPTY_SLOT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_has_empty_slots() {
        let node = VectorNode::new(0, vec![1.0, 0.0], 2, 4);
        assert_eq!(node.level_count(), 3);
        for level in 0..=2 {
            assert_eq!(node.slots(level), &[EMPTY_SLOT; 4]);
            assert_eq!(node.neighbors(level).count(), 0);
        }
    }

    #[test]
    fn test_add_neighbor_fills_slots_then_rejects() {
        let mut node = VectorNode::new(0, vec![1.0], 0, 2);
        assert!(node.add_neighbor(0, 1));
        assert!(node.add_neighbor(0, 2));
        assert!(!node.add_neighbor(0, 3)); // full
        assert!(!node.add_neighbor(0, 1)); // already present
        let mut ids: Vec<_> = node.neighbors(0).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_add_neighbor_out_of_level() {
        let mut node = VectorNode::new(0, vec![1.0], 0, 2);
        assert!(!node.add_neighbor(3, 1));
    }

    #[test]
    fn test_set_neighbors_repads() {
        let mut node = VectorNode::new(0, vec![1.0], 0, 4);
        node.set_neighbors(0, &[5, 6]);
        assert_eq!(node.slots(0), &[5, 6, EMPTY_SLOT, EMPTY_SLOT]);
        node.set_neighbors(0, &[]);
        assert_eq!(node.slots(0), &[EMPTY_SLOT; 4]);
    }

    #[test]
    fn test_retain_neighbors_compacts() {
        let mut node = VectorNode::new(0, vec![1.0], 0, 4);
        node.set_neighbors(0, &[5, 6, 7]);
        node.retain_neighbors(|id| id != 6);
        assert_eq!(node.slots(0), &[5, 7, EMPTY_SLOT, EMPTY_SLOT]);
    }

    #[test]
    fn test_cached_magnitude_invalidated_on_write() {
        let mut node = VectorNode::new(0, vec![3.0, 4.0], 0, 4);
        assert!((node.magnitude() - 5.0).abs() < 1e-6);
        node.set_vector(vec![0.0, 2.0]);
        assert!((node.magnitude() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_form() {
        let node = VectorNode::new(0, vec![3.0, 4.0], 0, 4);
        let n = node.normalized();
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_zero_vector() {
        let node = VectorNode::new(0, vec![0.0, 0.0], 0, 4);
        assert_eq!(node.normalized(), &[0.0, 0.0]);
    }
}
