//! Layered proximity graph (HNSW) index.
//!
//! A multi-layer navigable small-world graph over [`VectorNode`]s. Layer 0
//! holds every node; higher layers hold a geometrically thinning subset.
//! Search greedily descends from the top layer, then runs a bounded beam
//! search at the base layer.
//!
//! ## Level assignment
//!
//! Levels are sampled from a precomputed cumulative geometric table
//! parameterized by `level_mult = 1/ln(m)`, driven by a fixed-seed SplitMix64
//! counter. Identical insert sequences produce identical graphs.
//!
//! ## Deletes
//!
//! `delete_point` only sets a tombstone. Tombstoned nodes still serve as
//! graph waypoints during traversal but are excluded from results; an
//! explicit `prune_deleted_nodes` pass removes them physically and rewrites
//! surviving neighbor slots.
//!
//! ## Concurrency
//!
//! Single-writer: callers serialize all mutation. `search` takes `&self` and
//! is safe to run concurrently with other searches.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::distance::{cosine_prenorm, dot_product, euclidean_similarity, l2_norm};
use crate::error::{IdFault, VectorError, VectorResult};
use crate::node::VectorNode;
use crate::pool::{sort_descending, Scored, ScratchPool, SearchScratch};
use crate::rng::SplitMix64;
use crate::types::{DistanceMetric, HnswConfig, NodeId, EMPTY_SLOT};

/// Highest level the geometric table will ever assign.
const MAX_LEVEL: usize = 32;

/// Fixed RNG seed for level assignment.
const LEVEL_RNG_SEED: u64 = 42;

/// Live-node count at or above which search gathers multiple entry points.
const MULTI_ENTRY_THRESHOLD: usize = 512;

/// Number of nodes sampled by the cheap entry probe.
const ENTRY_PROBE_SAMPLE: usize = 32;

/// Max entry points carried into the descent.
const MAX_ENTRY_BRANCHES: usize = 3;

/// Two candidate entries are "mutually dissimilar" when the cosine of their
/// normalized forms stays below this.
const ENTRY_DISSIMILARITY: f32 = 0.9;

/// Ceiling for the adaptively widened base-layer beam.
const EF_CEILING: usize = 512;

/// Widening attempts at layer 0 after the initial pass.
const LAYER0_WIDENING_ATTEMPTS: usize = 2;

/// Progress callback granularity for batch builds.
const PROGRESS_CHUNK: usize = 64;

/// A ranked search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: NodeId,
    /// Similarity score, higher = more similar.
    pub score: f32,
}

/// Progress report emitted by [`HnswIndex::build_index_with_progress`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildProgress {
    pub completed: usize,
    pub total: usize,
    /// completed / total, in [0, 1].
    pub fraction: f32,
    /// Estimated remaining time, None on the final report.
    pub eta: Option<Duration>,
}

/// Hierarchical navigable small-world graph index.
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    /// Fixed by the first insertion; None while empty and never before.
    pub(crate) dimension: Option<usize>,
    /// BTreeMap for deterministic iteration order.
    pub(crate) nodes: BTreeMap<NodeId, VectorNode>,
    /// Global search root; [`EMPTY_SLOT`] when the index is empty. Always
    /// references a non-deleted node otherwise.
    pub(crate) entry_point: NodeId,
    /// Max `level` among non-deleted nodes.
    pub(crate) level_max: usize,
    /// Cumulative geometric level-probability table.
    level_table: Vec<f64>,
    pub(crate) rng: SplitMix64,
    pool: ScratchPool,
}

impl HnswIndex {
    /// Create an empty index. Fails on out-of-range configuration.
    pub fn new(config: HnswConfig) -> VectorResult<Self> {
        config.validate()?;
        let level_table = build_level_table(config.level_mult());
        Ok(Self {
            config,
            dimension: None,
            nodes: BTreeMap::new(),
            entry_point: EMPTY_SLOT,
            level_max: 0,
            level_table,
            rng: SplitMix64::new(LEVEL_RNG_SEED),
            pool: ScratchPool::new(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Dimension fixed by the first insertion, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Count of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.nodes.values().filter(|n| !n.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total nodes in the map, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Count of tombstoned nodes awaiting a prune pass.
    pub fn tombstone_count(&self) -> usize {
        self.nodes.values().filter(|n| n.deleted).count()
    }

    /// True if `id` is indexed and live.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| !n.deleted)
    }

    /// Vector of a live node.
    pub fn get(&self, id: NodeId) -> Option<&[f32]> {
        self.nodes
            .get(&id)
            .filter(|n| !n.deleted)
            .map(|n| n.vector())
    }

    pub fn entry_point(&self) -> NodeId {
        self.entry_point
    }

    pub fn level_max(&self) -> usize {
        self.level_max
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a new point. Rejects negative and duplicate ids, empty vectors
    /// and dimension mismatches before any state change.
    pub fn insert(&mut self, id: NodeId, vector: Vec<f32>) -> VectorResult<()> {
        if id < 0 {
            return Err(VectorError::invalid_id(id, IdFault::Negative));
        }
        if vector.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        if self.nodes.contains_key(&id) {
            return Err(VectorError::invalid_id(id, IdFault::Duplicate));
        }
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        } else {
            self.dimension = Some(vector.len());
        }

        // First-ever point: level 0, sole entry point, no table sampling.
        if self.nodes.is_empty() {
            let node = VectorNode::new(id, vector, 0, self.config.m);
            self.nodes.insert(id, node);
            self.entry_point = id;
            self.level_max = 0;
            return Ok(());
        }

        let level = self.assign_level();
        let embedding = vector.clone();
        let qnorm = l2_norm(&embedding);
        let node = VectorNode::new(id, vector, level, self.config.m);
        self.nodes.insert(id, node);

        // Greedy descent to a good local entry for the node's level.
        let mut current = self.entry_point;
        if self.level_max > level {
            current = self.greedy_descend(&embedding, qnorm, current, self.level_max, level + 1);
        }

        // Link layer by layer with a bounded beam.
        let mut scratch = self.pool.checkout();
        let start_layer = level.min(self.level_max);
        for layer in (0..=start_layer).rev() {
            let candidates = self.search_layer(
                &embedding,
                qnorm,
                &[current],
                self.config.ef_construction,
                layer,
                &mut scratch,
            );
            let selected: Vec<NodeId> = candidates
                .iter()
                .take(self.config.m)
                .map(|s| s.id)
                .collect();

            if let Some(new_node) = self.nodes.get_mut(&id) {
                for &neighbor_id in &selected {
                    new_node.add_neighbor(layer, neighbor_id);
                }
            }

            for &neighbor_id in &selected {
                let overflowed = match self.nodes.get_mut(&neighbor_id) {
                    Some(n) => !n.add_neighbor(layer, id) && !n.has_neighbor(layer, id),
                    None => false,
                };
                if overflowed {
                    self.prune_overflowed(neighbor_id, layer, id);
                }
            }

            if let Some(closest) = candidates.first() {
                current = closest.id;
            }
        }
        self.pool.restore(scratch);

        // The new node becomes the entry when it tops the hierarchy, or when
        // deletions left the graph without a live entry.
        if level > self.level_max || self.entry_point == EMPTY_SLOT {
            self.entry_point = id;
            self.level_max = level.max(self.level_max);
        }
        Ok(())
    }

    /// Replace a live node's vector in place, invalidating its cached derived
    /// values. Graph adjacency is untouched; the router uses this to keep a
    /// centroid's routing node current.
    pub fn update_vector(&mut self, id: NodeId, vector: Vec<f32>) -> VectorResult<()> {
        if vector.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        match self.nodes.get_mut(&id) {
            Some(node) if !node.deleted => {
                node.set_vector(vector);
                Ok(())
            }
            _ => Err(VectorError::invalid_id(id, IdFault::Unknown)),
        }
    }

    /// Soft-delete a point. Neighbor lists keep referencing it until
    /// [`HnswIndex::prune_deleted_nodes`] runs; search skips it immediately.
    pub fn delete_point(&mut self, id: NodeId) -> VectorResult<()> {
        match self.nodes.get_mut(&id) {
            Some(node) if !node.deleted => node.deleted = true,
            _ => return Err(VectorError::invalid_id(id, IdFault::Unknown)),
        }
        let (ep, lm) = recover_entry_point(&self.nodes);
        if self.entry_point == id {
            self.entry_point = ep;
        }
        self.level_max = lm;
        debug!(id, "tombstoned point");
        Ok(())
    }

    /// Physically remove tombstoned nodes, rewriting every survivor's
    /// neighbor slots (dropped references re-padded with the empty sentinel)
    /// and re-electing the entry point if it was removed. Returns the number
    /// of nodes removed.
    pub fn prune_deleted_nodes(&mut self) -> usize {
        let removed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.deleted)
            .map(|(&id, _)| id)
            .collect();
        if removed.is_empty() {
            return 0;
        }
        for id in &removed {
            self.nodes.remove(id);
        }
        let removed_set: FxHashSet<NodeId> = removed.iter().copied().collect();
        for node in self.nodes.values_mut() {
            node.retain_neighbors(|id| !removed_set.contains(&id));
        }
        let (ep, lm) = recover_entry_point(&self.nodes);
        if removed_set.contains(&self.entry_point) || self.nodes.is_empty() {
            self.entry_point = ep;
        }
        self.level_max = lm;
        debug!(removed = removed.len(), "pruned tombstoned nodes");
        removed.len()
    }

    /// Reset to the freshly-created state (dimension unfixed, no entry
    /// point). The level RNG counter restarts so a rebuild reproduces the
    /// same graph for the same insert sequence.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.dimension = None;
        self.entry_point = EMPTY_SLOT;
        self.level_max = 0;
        self.rng.reset();
    }

    /// Clear and rebuild from scratch via repeated insertion.
    ///
    /// On error the successfully inserted prefix remains; callers can retry
    /// with corrected input or `clear()`.
    pub fn build_index(&mut self, points: Vec<(NodeId, Vec<f32>)>) -> VectorResult<()> {
        self.build_index_with_progress(points, |_| {})
    }

    /// As [`HnswIndex::build_index`], reporting fractional progress and an
    /// ETA every few insertions so a host can interleave cancellation checks.
    pub fn build_index_with_progress(
        &mut self,
        points: Vec<(NodeId, Vec<f32>)>,
        mut on_progress: impl FnMut(BuildProgress),
    ) -> VectorResult<()> {
        self.clear();
        let total = points.len();
        let started = Instant::now();
        info!(total, "rebuilding graph index");
        for (i, (id, vector)) in points.into_iter().enumerate() {
            self.insert(id, vector)?;
            let completed = i + 1;
            if completed % PROGRESS_CHUNK == 0 || completed == total {
                let eta = if completed < total {
                    let elapsed = started.elapsed();
                    Some(elapsed.mul_f64((total - completed) as f64 / completed as f64))
                } else {
                    None
                };
                on_progress(BuildProgress {
                    completed,
                    total,
                    fraction: completed as f32 / total as f32,
                    eta,
                });
            }
        }
        info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "graph rebuild complete");
        Ok(())
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// k-nearest-neighbor search. Returns ranked `(id, score)` hits, score
    /// descending with id-ascending tie-break; empty only when the index
    /// holds no live nodes (or `k == 0`).
    ///
    /// `ef_search` overrides the configured base-layer beam width; the
    /// effective starting width is `max(k, ef_search)` and widens adaptively
    /// (doubling, bounded, at most two extra attempts) when the first pass
    /// comes back short.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: Option<usize>,
    ) -> VectorResult<Vec<SearchHit>> {
        if query.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }
        let live = self.len();
        if k == 0 || live == 0 {
            return Ok(Vec::new());
        }

        let qnorm = l2_norm(query);
        let mut scratch = self.pool.checkout();

        let mut entries = self.select_entries(query, qnorm);
        for layer in (1..=self.level_max).rev() {
            let beam = entries.len().max(1);
            let found = self.search_layer(query, qnorm, &entries, beam, layer, &mut scratch);
            if !found.is_empty() {
                entries.clear();
                entries.extend(found.iter().map(|s| s.id));
            }
        }

        let target = k.min(live);
        let mut ef = k.max(ef_search.unwrap_or(self.config.ef_search));
        let mut hits = Vec::new();
        for attempt in 0..=LAYER0_WIDENING_ATTEMPTS {
            hits = self.search_layer(query, qnorm, &entries, ef, 0, &mut scratch);
            if hits.len() >= target || attempt == LAYER0_WIDENING_ATTEMPTS || ef >= EF_CEILING {
                break;
            }
            ef = (ef * 2).min(EF_CEILING);
        }
        self.pool.restore(scratch);

        hits.truncate(k);
        Ok(hits
            .into_iter()
            .map(|s| SearchHit {
                id: s.id,
                score: s.score,
            })
            .collect())
    }

    /// Multi-branch entry selection. Small graphs descend from the single
    /// entry point; larger ones add up to two mutually dissimilar candidates
    /// from a cheap deterministic stride probe, to escape local optima.
    fn select_entries(&self, query: &[f32], qnorm: f32) -> Vec<NodeId> {
        let mut picked = vec![self.entry_point];
        if self.len() < MULTI_ENTRY_THRESHOLD {
            return picked;
        }

        let stride = (self.nodes.len() / ENTRY_PROBE_SAMPLE).max(1);
        let mut probes: Vec<Scored> = self
            .nodes
            .values()
            .step_by(stride)
            .filter(|n| !n.deleted)
            .map(|n| Scored {
                score: self.score_against(query, qnorm, n),
                id: n.id,
            })
            .collect();
        sort_descending(&mut probes);

        for probe in probes {
            if picked.len() >= MAX_ENTRY_BRANCHES {
                break;
            }
            if picked.contains(&probe.id) {
                continue;
            }
            let dissimilar = picked.iter().all(|&chosen| {
                match (self.nodes.get(&chosen), self.nodes.get(&probe.id)) {
                    (Some(a), Some(b)) => {
                        dot_product(a.normalized(), b.normalized()) < ENTRY_DISSIMILARITY
                    }
                    _ => true,
                }
            });
            if dissimilar {
                picked.push(probe.id);
            }
        }
        picked
    }

    /// Beam search at a single layer, seeded from `entries`.
    ///
    /// Tombstoned nodes are traversed as waypoints but never enter the
    /// results heap. Returns up to `ef` live hits sorted (score desc, id
    /// asc).
    fn search_layer(
        &self,
        query: &[f32],
        qnorm: f32,
        entries: &[NodeId],
        ef: usize,
        layer: usize,
        scratch: &mut SearchScratch,
    ) -> Vec<Scored> {
        scratch.reset();

        for &entry in entries {
            let Some(node) = self.nodes.get(&entry) else {
                continue;
            };
            if !scratch.visited.insert(entry) {
                continue;
            }
            let score = self.score_against(query, qnorm, node);
            scratch.candidates.push(Scored { score, id: entry });
            if !node.deleted {
                scratch.results.push(Reverse(Scored { score, id: entry }));
            }
        }

        while let Some(nearest) = scratch.candidates.pop() {
            let worst = scratch
                .results
                .peek()
                .map(|r| r.0.score)
                .unwrap_or(f32::NEG_INFINITY);
            if nearest.score < worst && scratch.results.len() >= ef {
                break;
            }
            let Some(node) = self.nodes.get(&nearest.id) else {
                continue;
            };
            for neighbor_id in node.neighbors(layer) {
                if !scratch.visited.insert(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = self.nodes.get(&neighbor_id) else {
                    continue;
                };
                let score = self.score_against(query, qnorm, neighbor);
                let worst = scratch
                    .results
                    .peek()
                    .map(|r| r.0.score)
                    .unwrap_or(f32::NEG_INFINITY);
                if scratch.results.len() < ef || score > worst {
                    scratch.candidates.push(Scored {
                        score,
                        id: neighbor_id,
                    });
                    if !neighbor.deleted {
                        scratch.results.push(Reverse(Scored {
                            score,
                            id: neighbor_id,
                        }));
                        if scratch.results.len() > ef {
                            scratch.results.pop();
                        }
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(scratch.results.len());
        while let Some(Reverse(s)) = scratch.results.pop() {
            out.push(s);
        }
        sort_descending(&mut out);
        out
    }

    /// Greedy single-best descent from `from_layer` down to `to_layer`.
    fn greedy_descend(
        &self,
        query: &[f32],
        qnorm: f32,
        entry: NodeId,
        from_layer: usize,
        to_layer: usize,
    ) -> NodeId {
        let mut current = entry;
        for layer in (to_layer..=from_layer).rev() {
            loop {
                let Some(node) = self.nodes.get(&current) else {
                    break;
                };
                let mut best_score = self.score_against(query, qnorm, node);
                let mut best_id = current;
                for neighbor_id in node.neighbors(layer) {
                    if let Some(neighbor) = self.nodes.get(&neighbor_id) {
                        let score = self.score_against(query, qnorm, neighbor);
                        if score > best_score || (score == best_score && neighbor_id < best_id) {
                            best_score = score;
                            best_id = neighbor_id;
                        }
                    }
                }
                if best_id == current {
                    break;
                }
                current = best_id;
            }
        }
        current
    }

    fn score_against(&self, query: &[f32], qnorm: f32, node: &VectorNode) -> f32 {
        match self.config.metric {
            DistanceMetric::Cosine => {
                cosine_prenorm(query, node.vector(), qnorm, node.magnitude())
            }
            DistanceMetric::Euclidean => euclidean_similarity(query, node.vector()),
        }
    }

    // ========================================================================
    // Internal: level assignment and pruning
    // ========================================================================

    fn assign_level(&mut self) -> usize {
        let u = self.rng.next_f64();
        self.level_table
            .iter()
            .position(|&cum| u < cum)
            .unwrap_or(self.level_table.len().saturating_sub(1))
    }

    /// Re-select the `m` most-similar neighbors of `owner` at `layer` from
    /// its current neighbors plus `incoming`. Similarity is computed against
    /// the owning node; tombstoned candidates are dropped.
    fn prune_overflowed(&mut self, owner: NodeId, layer: usize, incoming: NodeId) {
        let (owner_vec, owner_norm, mut candidate_ids) = match self.nodes.get(&owner) {
            Some(node) => (
                node.vector().to_vec(),
                node.magnitude(),
                node.neighbors(layer).collect::<Vec<NodeId>>(),
            ),
            None => return,
        };
        candidate_ids.push(incoming);

        let mut scored: Vec<Scored> = candidate_ids
            .into_iter()
            .filter_map(|id| {
                let node = self.nodes.get(&id)?;
                if node.deleted {
                    return None;
                }
                let score = match self.config.metric {
                    DistanceMetric::Cosine => {
                        cosine_prenorm(&owner_vec, node.vector(), owner_norm, node.magnitude())
                    }
                    DistanceMetric::Euclidean => euclidean_similarity(&owner_vec, node.vector()),
                };
                Some(Scored { score, id })
            })
            .collect();
        sort_descending(&mut scored);

        let keep: Vec<NodeId> = scored.iter().take(self.config.m).map(|s| s.id).collect();
        if let Some(node) = self.nodes.get_mut(&owner) {
            node.set_neighbors(layer, &keep);
        }
    }
}

/// Cumulative geometric level distribution: with `ml = 1/ln(m)` the
/// continuation ratio is `exp(-1/ml) = 1/m`, so the expected population
/// shrinks by `m` per level.
fn build_level_table(level_mult: f64) -> Vec<f64> {
    let ratio = (-1.0 / level_mult).exp();
    let mut table = Vec::new();
    let mut p = 1.0 - ratio;
    let mut cumulative = 0.0;
    while table.len() < MAX_LEVEL && cumulative + p < 1.0 - 1e-12 {
        cumulative += p;
        table.push(cumulative);
        p *= ratio;
    }
    table.push(1.0);
    table
}

/// Pure entry-point recovery: the lowest-id node at the highest live level,
/// or `(EMPTY_SLOT, 0)` when nothing survives.
pub(crate) fn recover_entry_point(nodes: &BTreeMap<NodeId, VectorNode>) -> (NodeId, usize) {
    let mut best: Option<(NodeId, usize)> = None;
    for (&id, node) in nodes {
        if node.deleted {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, level)) => node.level > level,
        };
        if better {
            best = Some((id, node.level));
        }
    }
    best.unwrap_or((EMPTY_SLOT, 0))
}
