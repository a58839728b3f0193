//! Cluster-routed two-tier index.
//!
//! Records are partitioned into clusters by k-means (k-means++ seeding,
//! cosine assignment, renormalized means); a small HNSW graph built over the
//! cluster centroids routes queries to a handful of promising clusters,
//! whose members are then scored exhaustively. This trades a little recall
//! for sub-linear scan cost on large collections.
//!
//! The router owns its storage tier: member vectors live here (optionally
//! scalar-quantized to u8 codes), fronted by a strict-LRU dequantization
//! cache. Incremental `upsert`/`remove` keep centroids exact by full
//! recomputation; clusters that outgrow `max_cluster_size` are split in
//! place.
//!
//! Single-writer like the graph index: `search` takes `&self` (the LRU cache
//! sits behind a mutex), everything else requires `&mut self`.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::HotVectorCache;
use crate::distance::{compute_similarity, euclidean_distance, euclidean_distance_sq, l2_norm};
use crate::error::{IdFault, VectorError, VectorResult};
use crate::hnsw::HnswIndex;
use crate::quantization::{QuantizedVector, ScalarQuantizer};
use crate::rng::SplitMix64;
use crate::types::{ClusterId, DistanceMetric, RouterConfig};

/// Fixed RNG seed for k-means seeding and split decisions.
const ROUTER_RNG_SEED: u64 = 7;

/// Maximum Lloyd iterations during a full build.
const KMEANS_MAX_ITERS: usize = 12;

/// Max vectors sampled when calibrating the scalar quantizer.
const QUANT_SAMPLE_MAX: usize = 256;

/// Adaptive probing always keeps at least this many clusters (when that many
/// exist).
const ADAPTIVE_PROBE_FLOOR: usize = 3;

/// Routing-graph tombstone count that triggers a physical prune.
const ROUTING_PRUNE_THRESHOLD: usize = 16;

/// A ranked router result.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterMatch {
    pub id: String,
    pub score: f32,
}

/// A cluster centroid with its summary statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub id: ClusterId,
    pub vector: Vec<f32>,
    pub member_count: usize,
    /// Max euclidean distance from the centroid to any member. Diagnostic
    /// only; routing never consults it.
    pub bounding_radius: f32,
}

/// Member vector storage, full-precision or quantized.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StoredVector {
    Full(Vec<f32>),
    Quantized(QuantizedVector),
}

#[derive(Debug, Clone)]
pub(crate) struct VectorRecord {
    pub(crate) id: String,
    pub(crate) vector: StoredVector,
    pub(crate) cluster_id: ClusterId,
    pub(crate) metadata: Option<Value>,
}

/// Two-tier clustered index over string-keyed records.
pub struct ClusterRouter {
    pub(crate) config: RouterConfig,
    pub(crate) dimension: Option<usize>,
    pub(crate) centroids: BTreeMap<ClusterId, Centroid>,
    pub(crate) members: BTreeMap<ClusterId, BTreeSet<String>>,
    pub(crate) records: BTreeMap<String, VectorRecord>,
    /// HNSW over centroids; node ids are cluster ids.
    pub(crate) routing: HnswIndex,
    pub(crate) quantizer: Option<ScalarQuantizer>,
    cache: Mutex<HotVectorCache>,
    pub(crate) next_cluster_id: ClusterId,
    pub(crate) rng: SplitMix64,
    pub(crate) built: bool,
}

impl ClusterRouter {
    pub fn new(config: RouterConfig) -> VectorResult<Self> {
        config.validate()?;
        let routing = HnswIndex::new(config.hnsw)?;
        let cache = Mutex::new(HotVectorCache::new(config.cache_capacity));
        Ok(Self {
            config,
            dimension: None,
            centroids: BTreeMap::new(),
            members: BTreeMap::new(),
            records: BTreeMap::new(),
            routing,
            quantizer: None,
            cache,
            next_cluster_id: 0,
            rng: SplitMix64::new(ROUTER_RNG_SEED),
            built: false,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Cluster currently holding `id`.
    pub fn cluster_of(&self, id: &str) -> Option<ClusterId> {
        self.records.get(id).map(|r| r.cluster_id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Centroid> {
        self.centroids.values()
    }

    /// A record's vector, dequantized if stored as codes.
    pub fn get_vector(&self, id: &str) -> Option<Vec<f32>> {
        self.records.get(id).and_then(|r| self.materialize(r))
    }

    pub fn metadata(&self, id: &str) -> Option<&Value> {
        self.records.get(id).and_then(|r| r.metadata.as_ref())
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Full (re)build: k-means over the batch, routing graph over the
    /// resulting centroids, optional quantizer calibration.
    ///
    /// Staged: input is validated and clustered into local state first, and
    /// existing state is only replaced once everything succeeded. Errors
    /// leave the router exactly as it was.
    pub fn build_index(&mut self, points: Vec<(String, Vec<f32>)>) -> VectorResult<()> {
        if points.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        // Validation pass before any clustering work.
        let mut seen = BTreeSet::new();
        let mut dimension = None;
        for (id, vector) in &points {
            if vector.is_empty() {
                return Err(VectorError::EmptyVector);
            }
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if vector.len() != expected => {
                    return Err(VectorError::DimensionMismatch {
                        expected,
                        got: vector.len(),
                    });
                }
                Some(_) => {}
            }
            if !seen.insert(id.clone()) {
                return Err(VectorError::invalid_id(id, IdFault::Duplicate));
            }
        }

        let mut rng = SplitMix64::new(ROUTER_RNG_SEED);
        let metric = self.config.hnsw.metric;
        info!(points = points.len(), clusters = self.config.num_clusters, "building cluster index");

        let k = self.config.num_clusters.min(points.len());
        let vectors: Vec<&[f32]> = points.iter().map(|(_, v)| v.as_slice()).collect();
        let assignments = kmeans(&vectors, k, metric, &mut rng);

        // Quantizer calibration over a bounded stride sample.
        let quantizer = if self.config.quantize_vectors {
            let stride = (points.len() / QUANT_SAMPLE_MAX).max(1);
            Some(ScalarQuantizer::calibrate(
                vectors.iter().step_by(stride).copied(),
            ))
        } else {
            None
        };

        // Materialize clusters, keeping only the non-empty ones.
        let mut centroids = BTreeMap::new();
        let mut members: BTreeMap<ClusterId, BTreeSet<String>> = BTreeMap::new();
        let mut records = BTreeMap::new();
        let mut next_id: ClusterId = 0;
        for cluster in 0..k {
            let indices: Vec<usize> = (0..points.len())
                .filter(|&i| assignments[i] == cluster)
                .collect();
            if indices.is_empty() {
                continue;
            }
            let cluster_id = next_id;
            next_id += 1;
            let member_vecs: Vec<&[f32]> = indices.iter().map(|&i| vectors[i]).collect();
            let centroid_vec = mean_vector(&member_vecs, metric);
            let bounding_radius = member_vecs
                .iter()
                .map(|v| euclidean_distance(&centroid_vec, v))
                .fold(0.0f32, f32::max);
            centroids.insert(
                cluster_id,
                Centroid {
                    id: cluster_id,
                    vector: centroid_vec,
                    member_count: indices.len(),
                    bounding_radius,
                },
            );
            let mut set = BTreeSet::new();
            for &i in &indices {
                let (id, vector) = &points[i];
                set.insert(id.clone());
                let stored = match &quantizer {
                    Some(q) => StoredVector::Quantized(q.quantize(vector)),
                    None => StoredVector::Full(vector.clone()),
                };
                records.insert(
                    id.clone(),
                    VectorRecord {
                        id: id.clone(),
                        vector: stored,
                        cluster_id,
                        metadata: None,
                    },
                );
            }
            members.insert(cluster_id, set);
        }

        self.commit(dimension, centroids, members, records, quantizer, rng)
    }

    /// Replace live state with a staged build and rebuild the routing graph.
    fn commit(
        &mut self,
        dimension: Option<usize>,
        centroids: BTreeMap<ClusterId, Centroid>,
        members: BTreeMap<ClusterId, BTreeSet<String>>,
        records: BTreeMap<String, VectorRecord>,
        quantizer: Option<ScalarQuantizer>,
        rng: SplitMix64,
    ) -> VectorResult<()> {
        let mut routing = HnswIndex::new(self.config.hnsw)?;
        routing.build_index(
            centroids
                .values()
                .map(|c| (c.id, c.vector.clone()))
                .collect(),
        )?;
        self.next_cluster_id = centroids.keys().max().map(|&id| id + 1).unwrap_or(0);
        self.dimension = dimension;
        self.centroids = centroids;
        self.members = members;
        self.records = records;
        self.routing = routing;
        self.quantizer = quantizer;
        self.rng = rng;
        self.cache.lock().clear();
        self.built = true;
        debug!(clusters = self.centroids.len(), records = self.records.len(), "cluster index committed");
        Ok(())
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Two-phase search: route via the centroid graph, then score the probed
    /// clusters' members exhaustively. Results are (score desc, id asc).
    pub fn search(&self, query: &[f32], k: usize) -> VectorResult<Vec<RouterMatch>> {
        if !self.built {
            return Err(VectorError::BuildRequired);
        }
        if query.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        if let Some(expected) = self.dimension {
            if query.len() != expected {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let probed = self.select_probes(query)?;
        let metric = self.config.hnsw.metric;
        let mut matches: Vec<RouterMatch> = Vec::new();
        for cluster_id in probed {
            let Some(member_ids) = self.members.get(&cluster_id) else {
                continue;
            };
            for id in member_ids {
                if let Some(record) = self.records.get(id) {
                    if let Some(score) = self.score_record(query, record, metric) {
                        matches.push(RouterMatch {
                            id: id.clone(),
                            score,
                        });
                    }
                }
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    /// Pick the clusters to scan. Asks the routing graph for twice the base
    /// probe count, then (when adaptive) keeps every probe within
    /// `probe_threshold` of the best one, floored at a small minimum and
    /// capped at `max_probe_count`.
    fn select_probes(&self, query: &[f32]) -> VectorResult<Vec<ClusterId>> {
        let want = (self.config.search_probe_count * 2)
            .min(self.centroids.len())
            .max(1);
        let probes = self.routing.search(query, want, None)?;
        if probes.is_empty() {
            // Routing graph unusable (e.g. everything tombstoned); fall back
            // to scanning every cluster.
            return Ok(self.centroids.keys().copied().collect());
        }
        if !self.config.adaptive_probing {
            return Ok(probes
                .iter()
                .take(self.config.search_probe_count)
                .map(|h| h.id)
                .collect());
        }
        let best = probes[0].score;
        let floor = ADAPTIVE_PROBE_FLOOR.min(probes.len());
        let mut selected = Vec::new();
        for (i, hit) in probes.iter().enumerate() {
            if selected.len() >= self.config.max_probe_count {
                break;
            }
            if i < floor || best - hit.score <= self.config.probe_threshold {
                selected.push(hit.id);
            }
        }
        Ok(selected)
    }

    /// Score one record against the query, consulting the hot-vector cache
    /// for quantized storage.
    fn score_record(&self, query: &[f32], record: &VectorRecord, metric: DistanceMetric) -> Option<f32> {
        match &record.vector {
            StoredVector::Full(v) => Some(compute_similarity(query, v, metric)),
            StoredVector::Quantized(qv) => {
                let quantizer = self.quantizer.as_ref()?;
                let mut cache = self.cache.lock();
                if let Some(v) = cache.get(&record.id) {
                    return Some(compute_similarity(query, v, metric));
                }
                let v = quantizer.dequantize(qv);
                let score = compute_similarity(query, &v, metric);
                cache.insert(record.id.clone(), v);
                Some(score)
            }
        }
    }

    // ========================================================================
    // Incremental mutation
    // ========================================================================

    /// Insert or replace a record, assigning it to the nearest centroid and
    /// recomputing the affected centroids exactly. Oversized clusters are
    /// split afterwards.
    pub fn upsert(
        &mut self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: Option<Value>,
    ) -> VectorResult<()> {
        if !self.built {
            return Err(VectorError::BuildRequired);
        }
        if vector.is_empty() {
            return Err(VectorError::EmptyVector);
        }
        let id = id.into();
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

        // Detach from the previous cluster first so recomputes see the final
        // membership.
        let previous = self.records.get(&id).map(|r| r.cluster_id);
        if let Some(old_cluster) = previous {
            if let Some(set) = self.members.get_mut(&old_cluster) {
                set.remove(&id);
            }
        }

        // A built router always has at least one centroid (build rejects
        // empty input and splits only ever add clusters).
        let Some(cluster_id) = self.nearest_centroid(&vector) else {
            return Err(VectorError::BuildRequired);
        };

        let stored = match &self.quantizer {
            Some(q) => StoredVector::Quantized(q.quantize(&vector)),
            None => StoredVector::Full(vector),
        };
        self.records.insert(
            id.clone(),
            VectorRecord {
                id: id.clone(),
                vector: stored,
                cluster_id,
                metadata,
            },
        );
        self.members.entry(cluster_id).or_default().insert(id.clone());
        self.cache.lock().remove(&id);

        self.recompute_centroid(cluster_id)?;
        if let Some(old_cluster) = previous {
            if old_cluster != cluster_id {
                self.recompute_centroid(old_cluster)?;
            }
        }

        let size = self.members.get(&cluster_id).map_or(0, |s| s.len());
        if size > self.config.max_cluster_size {
            self.split_cluster(cluster_id)?;
        }
        Ok(())
    }

    /// Hard-remove a record, recomputing its cluster's centroid over the
    /// remaining members. An emptied cluster keeps its last centroid (with
    /// radius 0) so nearby future upserts can still land there.
    pub fn remove(&mut self, id: &str) -> VectorResult<()> {
        if !self.built {
            return Err(VectorError::BuildRequired);
        }
        let record = self
            .records
            .remove(id)
            .ok_or_else(|| VectorError::invalid_id(id, IdFault::Unknown))?;
        if let Some(set) = self.members.get_mut(&record.cluster_id) {
            set.remove(id);
        }
        self.cache.lock().remove(id);
        self.recompute_centroid(record.cluster_id)?;
        Ok(())
    }

    /// Reset to the unbuilt state.
    pub fn clear(&mut self) {
        self.dimension = None;
        self.centroids.clear();
        self.members.clear();
        self.records.clear();
        self.routing.clear();
        self.quantizer = None;
        self.cache.lock().clear();
        self.next_cluster_id = 0;
        self.rng = SplitMix64::new(ROUTER_RNG_SEED);
        self.built = false;
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Nearest centroid by linear scan. The full scan keeps placement exact;
    /// centroid counts stay small enough that this is cheap.
    fn nearest_centroid(&self, vector: &[f32]) -> Option<ClusterId> {
        let metric = self.config.hnsw.metric;
        let mut best: Option<(ClusterId, f32)> = None;
        for centroid in self.centroids.values() {
            let score = compute_similarity(vector, &centroid.vector, metric);
            let better = match best {
                None => true,
                Some((_, s)) => score > s,
            };
            if better {
                best = Some((centroid.id, score));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Recompute a cluster's centroid, count and radius from its current
    /// members, and push the new centroid into the routing graph.
    fn recompute_centroid(&mut self, cluster_id: ClusterId) -> VectorResult<()> {
        let metric = self.config.hnsw.metric;
        let member_vecs: Vec<Vec<f32>> = self
            .members
            .get(&cluster_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id).and_then(|r| self.materialize(r)))
            .collect();

        let Some(centroid) = self.centroids.get_mut(&cluster_id) else {
            return Ok(());
        };
        if member_vecs.is_empty() {
            centroid.member_count = 0;
            centroid.bounding_radius = 0.0;
            return Ok(());
        }
        let refs: Vec<&[f32]> = member_vecs.iter().map(|v| v.as_slice()).collect();
        let vector = mean_vector(&refs, metric);
        centroid.bounding_radius = refs
            .iter()
            .map(|v| euclidean_distance(&vector, v))
            .fold(0.0f32, f32::max);
        centroid.member_count = refs.len();
        centroid.vector = vector.clone();
        if self.routing.contains(cluster_id) {
            self.routing.update_vector(cluster_id, vector)?;
        } else {
            self.routing.insert(cluster_id, vector)?;
        }
        Ok(())
    }

    /// Split an oversized cluster into two around a pseudo-random seed pair.
    /// Single-pass: each member joins the nearer seed, once. Clusters with
    /// fewer than two members are left alone.
    fn split_cluster(&mut self, cluster_id: ClusterId) -> VectorResult<()> {
        let member_ids: Vec<String> = self
            .members
            .get(&cluster_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        if member_ids.len() < 2 {
            return Ok(());
        }
        let member_vecs: Vec<Vec<f32>> = member_ids
            .iter()
            .filter_map(|id| self.records.get(id).and_then(|r| self.materialize(r)))
            .collect();
        if member_vecs.len() != member_ids.len() {
            warn!(cluster_id, "cluster membership out of sync with records, skipping split");
            return Ok(());
        }

        let n = member_ids.len();
        let seed_a = self.rng.next_bounded(n);
        let mut seed_b = self.rng.next_bounded(n);
        if seed_b == seed_a {
            seed_b = (seed_a + 1) % n;
        }

        let metric = self.config.hnsw.metric;
        let mut side_a = Vec::new();
        let mut side_b = Vec::new();
        for i in 0..n {
            let to_a = compute_similarity(&member_vecs[i], &member_vecs[seed_a], metric);
            let to_b = compute_similarity(&member_vecs[i], &member_vecs[seed_b], metric);
            if to_a >= to_b {
                side_a.push(i);
            } else {
                side_b.push(i);
            }
        }
        // Both sides must end up non-empty.
        if side_a.is_empty() {
            side_a.push(side_b.pop().unwrap_or(seed_a));
        } else if side_b.is_empty() {
            side_b.push(side_a.pop().unwrap_or(seed_b));
        }

        let id_a = self.next_cluster_id;
        let id_b = self.next_cluster_id + 1;
        self.next_cluster_id += 2;
        debug!(from = cluster_id, into_a = id_a, into_b = id_b, "splitting cluster");

        for (new_id, side) in [(id_a, &side_a), (id_b, &side_b)] {
            let vecs: Vec<&[f32]> = side.iter().map(|&i| member_vecs[i].as_slice()).collect();
            let vector = mean_vector(&vecs, metric);
            let bounding_radius = vecs
                .iter()
                .map(|v| euclidean_distance(&vector, v))
                .fold(0.0f32, f32::max);
            let mut set = BTreeSet::new();
            for &i in side {
                set.insert(member_ids[i].clone());
                if let Some(record) = self.records.get_mut(&member_ids[i]) {
                    record.cluster_id = new_id;
                }
            }
            self.centroids.insert(
                new_id,
                Centroid {
                    id: new_id,
                    vector: vector.clone(),
                    member_count: side.len(),
                    bounding_radius,
                },
            );
            self.members.insert(new_id, set);
            self.routing.insert(new_id, vector)?;
        }

        self.centroids.remove(&cluster_id);
        self.members.remove(&cluster_id);
        self.routing.delete_point(cluster_id)?;
        if self.routing.tombstone_count() > ROUTING_PRUNE_THRESHOLD {
            self.routing.prune_deleted_nodes();
        }
        Ok(())
    }

    fn materialize(&self, record: &VectorRecord) -> Option<Vec<f32>> {
        match &record.vector {
            StoredVector::Full(v) => Some(v.clone()),
            StoredVector::Quantized(qv) => Some(self.quantizer.as_ref()?.dequantize(qv)),
        }
    }
}

/// Mean of the given vectors, renormalized to unit length under the cosine
/// metric (zero means are left as-is).
fn mean_vector(vectors: &[&[f32]], metric: DistanceMetric) -> Vec<f32> {
    let dim = vectors.first().map_or(0, |v| v.len());
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (acc, x) in mean.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for x in &mut mean {
        *x /= n;
    }
    if metric == DistanceMetric::Cosine {
        let norm = l2_norm(&mean);
        if norm > 0.0 {
            for x in &mut mean {
                *x /= norm;
            }
        }
    }
    mean
}

/// Lloyd's k-means with k-means++ seeding. Seeding weights candidates by
/// squared euclidean distance to the nearest chosen seed; assignment uses the
/// router's similarity metric. Returns a cluster index per input vector.
fn kmeans(
    vectors: &[&[f32]],
    k: usize,
    metric: DistanceMetric,
    rng: &mut SplitMix64,
) -> Vec<usize> {
    let n = vectors.len();
    if k <= 1 {
        return vec![0; n];
    }

    // k-means++ seeding.
    let mut seeds: Vec<Vec<f32>> = Vec::with_capacity(k);
    seeds.push(vectors[rng.next_bounded(n)].to_vec());
    let mut weights = vec![0.0f64; n];
    while seeds.len() < k {
        let mut total = 0.0f64;
        for (i, v) in vectors.iter().enumerate() {
            let nearest = seeds
                .iter()
                .map(|s| euclidean_distance_sq(v, s) as f64)
                .fold(f64::INFINITY, f64::min);
            weights[i] = nearest;
            total += nearest;
        }
        let next = if total > 0.0 {
            let mut target = rng.next_f64() * total;
            let mut chosen = n - 1;
            for (i, &w) in weights.iter().enumerate() {
                if target < w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // All points coincide with existing seeds.
            rng.next_bounded(n)
        };
        seeds.push(vectors[next].to_vec());
    }

    // Lloyd iterations: metric-based assignment, renormalized means.
    let mut assignments = vec![0usize; n];
    for _ in 0..KMEANS_MAX_ITERS {
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for (c, seed) in seeds.iter().enumerate() {
                let score = compute_similarity(v, seed, metric);
                if score > best_score {
                    best_score = score;
                    best = c;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, seed) in seeds.iter_mut().enumerate() {
            let members: Vec<&[f32]> = (0..n)
                .filter(|&i| assignments[i] == c)
                .map(|i| vectors[i])
                .collect();
            if !members.is_empty() {
                *seed = mean_vector(&members, metric);
            }
        }
    }
    assignments
}
