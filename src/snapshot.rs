//! Versioned JSON snapshots of graph and router state.
//!
//! Documents carry a `metadata` envelope (format version, timestamps, an
//! xxh3 checksum over structural scalars) around a compact body: config
//! fields equal to their defaults are omitted, neighbor lists are flattened
//! to `[count, id...]` runs per level, and `deleted: false` is elided.
//!
//! Loading is deliberately permissive. Checksum or count mismatches are
//! logged and tolerated; only input the loader cannot reconstruct a working
//! index from (truncated neighbor runs, negative ids, unknown versions)
//! fails with [`VectorError::CorruptedSerialization`].
//!
//! Pre-versioned snapshots (no `metadata` envelope, nested per-level
//! neighbor arrays) are detected by the absence of `metadata.version` and
//! migrated in place on load.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{VectorError, VectorResult};
use crate::hnsw::{recover_entry_point, HnswIndex};
use crate::node::VectorNode;
use crate::quantization::ScalarQuantizer;
use crate::router::{ClusterRouter, StoredVector, VectorRecord};
use crate::types::{ClusterId, DistanceMetric, HnswConfig, NodeId, RouterConfig};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Format version of a snapshot document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentVersion {
    /// Pre-envelope format: no `metadata` object, nested neighbor arrays.
    Legacy,
    V1,
}

/// Envelope common to every snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub version: u32,
    /// Unix millis at first serialization.
    pub created: u64,
    /// Unix millis at last serialization.
    pub updated: u64,
    /// xxh3-64 over the document's structural scalars (ids, levels, counts;
    /// never float payloads).
    pub checksum: u64,
}

/// Graph parameters with defaults omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfigDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_construction: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ef_search: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<DistanceMetric>,
}

impl GraphConfigDoc {
    fn from_config(config: &HnswConfig) -> Self {
        let defaults = HnswConfig::default();
        Self {
            m: (config.m != defaults.m).then_some(config.m),
            ef_construction: (config.ef_construction != defaults.ef_construction)
                .then_some(config.ef_construction),
            ef_search: (config.ef_search != defaults.ef_search).then_some(config.ef_search),
            metric: (config.metric != defaults.metric).then_some(config.metric),
        }
    }

    fn into_config(self) -> HnswConfig {
        let defaults = HnswConfig::default();
        HnswConfig {
            m: self.m.unwrap_or(defaults.m),
            ef_construction: self.ef_construction.unwrap_or(defaults.ef_construction),
            ef_search: self.ef_search.unwrap_or(defaults.ef_search),
            metric: self.metric.unwrap_or(defaults.metric),
        }
    }
}

/// Graph-wide scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSection {
    pub dimension: Option<usize>,
    pub entry_point: NodeId,
    pub level_max: usize,
    pub node_count: usize,
    /// Level-RNG counter, so inserts after a reload continue the same
    /// deterministic level sequence. Absent in early v1 snapshots.
    #[serde(default)]
    pub rng_counter: u64,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One node. `neighbors` holds one `[count, id...]` run per level, level 0
/// first, empty slots elided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub id: NodeId,
    pub level: usize,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    pub neighbors: Vec<i64>,
}

/// A complete graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub config: GraphConfigDoc,
    pub graph: GraphSection,
    pub nodes: Vec<NodeDoc>,
}

/// Router parameters with defaults omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfigDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_clusters: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cluster_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_probe_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_probing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_probe_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantize_vectors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw: Option<GraphConfigDoc>,
}

impl RouterConfigDoc {
    fn from_config(config: &RouterConfig) -> Self {
        let defaults = RouterConfig::default();
        Self {
            num_clusters: (config.num_clusters != defaults.num_clusters)
                .then_some(config.num_clusters),
            max_cluster_size: (config.max_cluster_size != defaults.max_cluster_size)
                .then_some(config.max_cluster_size),
            search_probe_count: (config.search_probe_count != defaults.search_probe_count)
                .then_some(config.search_probe_count),
            probe_threshold: (config.probe_threshold != defaults.probe_threshold)
                .then_some(config.probe_threshold),
            adaptive_probing: (config.adaptive_probing != defaults.adaptive_probing)
                .then_some(config.adaptive_probing),
            max_probe_count: (config.max_probe_count != defaults.max_probe_count)
                .then_some(config.max_probe_count),
            quantize_vectors: (config.quantize_vectors != defaults.quantize_vectors)
                .then_some(config.quantize_vectors),
            cache_capacity: (config.cache_capacity != defaults.cache_capacity)
                .then_some(config.cache_capacity),
            hnsw: (config.hnsw != defaults.hnsw)
                .then(|| GraphConfigDoc::from_config(&config.hnsw)),
        }
    }

    fn into_config(self) -> RouterConfig {
        let defaults = RouterConfig::default();
        RouterConfig {
            num_clusters: self.num_clusters.unwrap_or(defaults.num_clusters),
            max_cluster_size: self.max_cluster_size.unwrap_or(defaults.max_cluster_size),
            search_probe_count: self
                .search_probe_count
                .unwrap_or(defaults.search_probe_count),
            probe_threshold: self.probe_threshold.unwrap_or(defaults.probe_threshold),
            adaptive_probing: self.adaptive_probing.unwrap_or(defaults.adaptive_probing),
            max_probe_count: self.max_probe_count.unwrap_or(defaults.max_probe_count),
            quantize_vectors: self.quantize_vectors.unwrap_or(defaults.quantize_vectors),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            hnsw: self.hnsw.map(GraphConfigDoc::into_config).unwrap_or(defaults.hnsw),
        }
    }
}

/// Router-wide scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSection {
    pub dimension: Option<usize>,
    pub next_cluster_id: ClusterId,
    pub built: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidDoc {
    pub id: ClusterId,
    pub vector: Vec<f32>,
    pub member_count: usize,
    pub bounding_radius: f32,
}

/// One stored record. Exactly one of `vector` (full precision) or `codes`
/// (quantized) is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoc {
    pub id: String,
    pub cluster_id: ClusterId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A complete router snapshot, embedding its routing graph document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDocument {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub config: RouterConfigDoc,
    pub cluster: ClusterSection,
    pub centroids: Vec<CentroidDoc>,
    pub records: Vec<RecordDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer: Option<ScalarQuantizer>,
    pub routing: GraphDocument,
}

/// Classify a parsed JSON document by format version.
pub fn sniff_version(doc: &Value) -> DocumentVersion {
    match doc.pointer("/metadata/version") {
        Some(v) if v.is_u64() => DocumentVersion::V1,
        _ => DocumentVersion::Legacy,
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Checksums
// ============================================================================

fn graph_checksum(
    dimension: Option<usize>,
    entry_point: NodeId,
    level_max: usize,
    nodes: &[NodeDoc],
) -> u64 {
    let mut bytes = Vec::with_capacity(32 + nodes.len() * 25);
    bytes.extend_from_slice(&(dimension.unwrap_or(0) as u64).to_le_bytes());
    bytes.extend_from_slice(&entry_point.to_le_bytes());
    bytes.extend_from_slice(&(level_max as u64).to_le_bytes());
    bytes.extend_from_slice(&(nodes.len() as u64).to_le_bytes());
    for node in nodes {
        bytes.extend_from_slice(&node.id.to_le_bytes());
        bytes.extend_from_slice(&(node.level as u64).to_le_bytes());
        bytes.push(node.deleted as u8);
        bytes.extend_from_slice(&(node.neighbors.len() as u64).to_le_bytes());
    }
    xxh3_64(&bytes)
}

fn router_checksum(
    next_cluster_id: ClusterId,
    centroids: &[CentroidDoc],
    records: &[RecordDoc],
    routing_checksum: u64,
) -> u64 {
    let mut bytes = Vec::with_capacity(32 + centroids.len() * 16 + records.len() * 8);
    bytes.extend_from_slice(&next_cluster_id.to_le_bytes());
    bytes.extend_from_slice(&(centroids.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(records.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&routing_checksum.to_le_bytes());
    for centroid in centroids {
        bytes.extend_from_slice(&centroid.id.to_le_bytes());
        bytes.extend_from_slice(&(centroid.member_count as u64).to_le_bytes());
    }
    for record in records {
        bytes.extend_from_slice(&record.cluster_id.to_le_bytes());
        bytes.extend_from_slice(record.id.as_bytes());
    }
    xxh3_64(&bytes)
}

// ============================================================================
// Neighbor run encoding
// ============================================================================

/// Flatten per-level neighbor lists into `[count, id...]` runs.
fn encode_runs(node: &VectorNode) -> Vec<i64> {
    let mut flat = Vec::new();
    for level in 0..node.level_count() {
        let ids: Vec<NodeId> = node.neighbors(level).collect();
        flat.push(ids.len() as i64);
        flat.extend(ids);
    }
    flat
}

/// Inverse of [`encode_runs`]: one run per level in `0..=level`. Truncated
/// or malformed input is a hard error.
fn decode_runs(flat: &[i64], level: usize, node_id: NodeId) -> VectorResult<Vec<Vec<NodeId>>> {
    let mut runs = Vec::with_capacity(level + 1);
    let mut pos = 0usize;
    for current in 0..=level {
        let Some(&count) = flat.get(pos) else {
            return Err(VectorError::CorruptedSerialization(format!(
                "node {node_id}: missing neighbor run for level {current}"
            )));
        };
        pos += 1;
        if count < 0 || pos + count as usize > flat.len() {
            return Err(VectorError::CorruptedSerialization(format!(
                "node {node_id}: truncated neighbor run at level {current}"
            )));
        }
        runs.push(flat[pos..pos + count as usize].to_vec());
        pos += count as usize;
    }
    if pos != flat.len() {
        warn!(node = node_id, "trailing neighbor data ignored");
    }
    Ok(runs)
}

// ============================================================================
// Graph snapshots
// ============================================================================

impl HnswIndex {
    /// Capture the full graph state as a versioned document.
    pub fn to_document(&self) -> GraphDocument {
        let nodes: Vec<NodeDoc> = self
            .nodes
            .values()
            .map(|node| NodeDoc {
                id: node.id,
                level: node.level,
                vector: node.vector().to_vec(),
                deleted: node.deleted,
                neighbors: encode_runs(node),
            })
            .collect();
        let checksum = graph_checksum(self.dimension, self.entry_point, self.level_max, &nodes);
        let now = epoch_millis();
        GraphDocument {
            metadata: DocumentMetadata {
                version: SNAPSHOT_VERSION,
                created: now,
                updated: now,
                checksum,
            },
            config: GraphConfigDoc::from_config(&self.config),
            graph: GraphSection {
                dimension: self.dimension,
                entry_point: self.entry_point,
                level_max: self.level_max,
                node_count: nodes.len(),
                rng_counter: self.rng.counter(),
            },
            nodes,
        }
    }

    /// Rebuild an index from a document. Count and checksum mismatches are
    /// logged and tolerated; structurally unusable input fails hard.
    pub fn from_document(doc: GraphDocument) -> VectorResult<Self> {
        if doc.metadata.version > SNAPSHOT_VERSION {
            return Err(VectorError::CorruptedSerialization(format!(
                "unsupported snapshot version {}",
                doc.metadata.version
            )));
        }
        if doc.graph.node_count != doc.nodes.len() {
            warn!(
                declared = doc.graph.node_count,
                actual = doc.nodes.len(),
                "node count mismatch in snapshot, using actual"
            );
        }
        let expected = graph_checksum(
            doc.graph.dimension,
            doc.graph.entry_point,
            doc.graph.level_max,
            &doc.nodes,
        );
        if expected != doc.metadata.checksum {
            warn!(
                declared = doc.metadata.checksum,
                computed = expected,
                "snapshot checksum mismatch, loading anyway"
            );
        }

        let config = doc.config.into_config();
        let mut index = HnswIndex::new(config)?;
        for node_doc in doc.nodes {
            if node_doc.id < 0 {
                return Err(VectorError::CorruptedSerialization(format!(
                    "negative node id {}",
                    node_doc.id
                )));
            }
            if node_doc.vector.is_empty() {
                return Err(VectorError::CorruptedSerialization(format!(
                    "node {} has an empty vector",
                    node_doc.id
                )));
            }
            if index.nodes.contains_key(&node_doc.id) {
                return Err(VectorError::CorruptedSerialization(format!(
                    "duplicate node id {}",
                    node_doc.id
                )));
            }
            let runs = decode_runs(&node_doc.neighbors, node_doc.level, node_doc.id)?;
            let mut node =
                VectorNode::new(node_doc.id, node_doc.vector, node_doc.level, config.m);
            node.deleted = node_doc.deleted;
            for (level, ids) in runs.iter().enumerate() {
                node.set_neighbors(level, ids);
            }
            index.nodes.insert(node_doc.id, node);
        }

        index.dimension = doc
            .graph
            .dimension
            .or_else(|| index.nodes.values().next().map(|n| n.vector().len()));
        let (recovered_entry, recovered_level) = recover_entry_point(&index.nodes);
        let live_entry = index
            .nodes
            .get(&doc.graph.entry_point)
            .is_some_and(|n| !n.deleted);
        if live_entry {
            index.entry_point = doc.graph.entry_point;
        } else {
            if !index.nodes.is_empty() {
                warn!(
                    declared = doc.graph.entry_point,
                    recovered = recovered_entry,
                    "snapshot entry point unusable, re-elected"
                );
            }
            index.entry_point = recovered_entry;
        }
        if doc.graph.level_max != recovered_level {
            warn!(
                declared = doc.graph.level_max,
                computed = recovered_level,
                "snapshot level_max mismatch, using computed"
            );
        }
        index.level_max = recovered_level;
        index.rng.set_counter(doc.graph.rng_counter);
        debug!(nodes = index.nodes.len(), "graph snapshot loaded");
        Ok(index)
    }

    pub fn to_json(&self) -> VectorResult<String> {
        serde_json::to_string(&self.to_document())
            .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))
    }

    /// Parse a JSON snapshot, migrating pre-versioned documents first.
    pub fn from_json(json: &str) -> VectorResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?;
        let doc = match sniff_version(&value) {
            DocumentVersion::V1 => serde_json::from_value(value)
                .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?,
            DocumentVersion::Legacy => migrate_legacy_graph(value)?,
        };
        Self::from_document(doc)
    }
}

/// Migrate a pre-versioned graph snapshot: nested `[[id...], ...]` neighbor
/// arrays per node and bare top-level fields, no metadata envelope.
pub fn migrate_legacy_graph(value: Value) -> VectorResult<GraphDocument> {
    info!("migrating legacy graph snapshot");
    let obj = value.as_object().ok_or_else(|| {
        VectorError::CorruptedSerialization("legacy snapshot is not an object".into())
    })?;

    let entry_point = obj
        .get("entry_point")
        .and_then(Value::as_i64)
        .unwrap_or(crate::types::EMPTY_SLOT);
    let level_max = obj
        .get("level_max")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    let dimension = obj
        .get("dimension")
        .and_then(Value::as_u64)
        .map(|d| d as usize);
    let config: GraphConfigDoc = match obj.get("config") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?,
        None => GraphConfigDoc::default(),
    };

    let raw_nodes = obj
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| VectorError::CorruptedSerialization("legacy snapshot has no nodes".into()))?;
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for raw in raw_nodes {
        let id = raw
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| VectorError::CorruptedSerialization("legacy node missing id".into()))?;
        let level = raw.get("level").and_then(Value::as_u64).unwrap_or(0) as usize;
        let vector: Vec<f32> = match raw.get("vector") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?,
            None => {
                return Err(VectorError::CorruptedSerialization(format!(
                    "legacy node {id} missing vector"
                )))
            }
        };
        let deleted = raw.get("deleted").and_then(Value::as_bool).unwrap_or(false);

        // Nested per-level arrays become flat [count, id...] runs. Missing
        // levels become empty runs.
        let nested: Vec<Vec<i64>> = match raw.get("neighbors") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?,
            None => Vec::new(),
        };
        let mut neighbors = Vec::new();
        for current in 0..=level {
            let ids: Vec<i64> = nested
                .get(current)
                .map(|run| run.iter().copied().filter(|&n| n >= 0).collect())
                .unwrap_or_default();
            neighbors.push(ids.len() as i64);
            neighbors.extend(ids);
        }
        nodes.push(NodeDoc {
            id,
            level,
            vector,
            deleted,
            neighbors,
        });
    }

    let checksum = graph_checksum(dimension, entry_point, level_max, &nodes);
    let now = epoch_millis();
    Ok(GraphDocument {
        metadata: DocumentMetadata {
            version: SNAPSHOT_VERSION,
            created: now,
            updated: now,
            checksum,
        },
        config,
        graph: GraphSection {
            dimension,
            entry_point,
            level_max,
            node_count: nodes.len(),
            rng_counter: 0,
        },
        nodes,
    })
}

// ============================================================================
// Router snapshots
// ============================================================================

impl ClusterRouter {
    /// Capture the full router state, embedding the routing graph document.
    pub fn to_document(&self) -> RouterDocument {
        let centroids: Vec<CentroidDoc> = self
            .centroids
            .values()
            .map(|c| CentroidDoc {
                id: c.id,
                vector: c.vector.clone(),
                member_count: c.member_count,
                bounding_radius: c.bounding_radius,
            })
            .collect();
        let records: Vec<RecordDoc> = self
            .records
            .values()
            .map(|r| {
                let (vector, codes) = match &r.vector {
                    StoredVector::Full(v) => (Some(v.clone()), None),
                    StoredVector::Quantized(qv) => (None, Some(qv.codes.clone())),
                };
                RecordDoc {
                    id: r.id.clone(),
                    cluster_id: r.cluster_id,
                    vector,
                    codes,
                    metadata: r.metadata.clone(),
                }
            })
            .collect();
        let routing = self.routing.to_document();
        let checksum = router_checksum(
            self.next_cluster_id,
            &centroids,
            &records,
            routing.metadata.checksum,
        );
        let now = epoch_millis();
        RouterDocument {
            metadata: DocumentMetadata {
                version: SNAPSHOT_VERSION,
                created: now,
                updated: now,
                checksum,
            },
            config: RouterConfigDoc::from_config(&self.config),
            cluster: ClusterSection {
                dimension: self.dimension,
                next_cluster_id: self.next_cluster_id,
                built: self.built,
            },
            centroids,
            records,
            quantizer: self.quantizer.clone(),
            routing,
        }
    }

    /// Rebuild a router from a document. Membership is derived from the
    /// records; records pointing at unknown clusters, or quantized records
    /// without a quantizer, are dropped with a warning.
    pub fn from_document(doc: RouterDocument) -> VectorResult<Self> {
        if doc.metadata.version > SNAPSHOT_VERSION {
            return Err(VectorError::CorruptedSerialization(format!(
                "unsupported snapshot version {}",
                doc.metadata.version
            )));
        }
        let expected = router_checksum(
            doc.cluster.next_cluster_id,
            &doc.centroids,
            &doc.records,
            doc.routing.metadata.checksum,
        );
        if expected != doc.metadata.checksum {
            warn!(
                declared = doc.metadata.checksum,
                computed = expected,
                "router checksum mismatch, loading anyway"
            );
        }

        let config = doc.config.into_config();
        let mut router = ClusterRouter::new(config)?;
        router.quantizer = doc.quantizer;
        router.routing = HnswIndex::from_document(doc.routing)?;

        for centroid_doc in doc.centroids {
            router.centroids.insert(
                centroid_doc.id,
                crate::router::Centroid {
                    id: centroid_doc.id,
                    vector: centroid_doc.vector,
                    member_count: centroid_doc.member_count,
                    bounding_radius: centroid_doc.bounding_radius,
                },
            );
            router.members.entry(centroid_doc.id).or_default();
        }

        for record_doc in doc.records {
            if !router.centroids.contains_key(&record_doc.cluster_id) {
                warn!(
                    id = %record_doc.id,
                    cluster = record_doc.cluster_id,
                    "record references unknown cluster, dropping"
                );
                continue;
            }
            let stored = match (record_doc.vector, record_doc.codes) {
                (Some(v), _) => StoredVector::Full(v),
                (None, Some(codes)) if router.quantizer.is_some() => {
                    StoredVector::Quantized(crate::quantization::QuantizedVector { codes })
                }
                (None, Some(_)) => {
                    warn!(id = %record_doc.id, "quantized record without quantizer, dropping");
                    continue;
                }
                (None, None) => {
                    return Err(VectorError::CorruptedSerialization(format!(
                        "record {} carries neither vector nor codes",
                        record_doc.id
                    )));
                }
            };
            router
                .members
                .entry(record_doc.cluster_id)
                .or_default()
                .insert(record_doc.id.clone());
            router.records.insert(
                record_doc.id.clone(),
                VectorRecord {
                    id: record_doc.id,
                    vector: stored,
                    cluster_id: record_doc.cluster_id,
                    metadata: record_doc.metadata,
                },
            );
        }

        router.dimension = doc.cluster.dimension;
        router.next_cluster_id = doc
            .cluster
            .next_cluster_id
            .max(router.centroids.keys().max().map(|&id| id + 1).unwrap_or(0));
        router.built = doc.cluster.built;
        debug!(
            clusters = router.centroids.len(),
            records = router.records.len(),
            "router snapshot loaded"
        );
        Ok(router)
    }

    pub fn to_json(&self) -> VectorResult<String> {
        serde_json::to_string(&self.to_document())
            .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> VectorResult<Self> {
        let doc: RouterDocument = serde_json::from_str(json)
            .map_err(|e| VectorError::CorruptedSerialization(e.to_string()))?;
        Self::from_document(doc)
    }
}
