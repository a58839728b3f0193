//! Shared types and configuration.
//!
//! `NodeId` is a caller-assigned non-negative integer. The value `-1`
//! ([`EMPTY_SLOT`]) is reserved: it pads unused neighbor slots and marks a
//! graph with no entry point.

use serde::{Deserialize, Serialize};

use crate::error::{VectorError, VectorResult};

/// Caller-assigned vector identifier. Non-negative for real nodes.
pub type NodeId = i64;

/// Sentinel for an unused neighbor slot, and for "no entry point".
pub const EMPTY_SLOT: NodeId = -1;

/// Identifier of a cluster inside the router. Doubles as the `NodeId` of the
/// cluster's centroid in the routing graph.
pub type ClusterId = i64;

/// Similarity metric. All scores are normalized to "higher = more similar".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// dot(a,b) / (|a| * |b|), range [-1, 1].
    Cosine,
    /// 1 / (1 + l2_distance), range (0, 1].
    Euclidean,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// HNSW graph parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Max neighbors per level (neighbor slot capacity).
    pub m: usize,
    /// Build-time beam width.
    pub ef_construction: usize,
    /// Default search-time beam width at the base layer.
    pub ef_search: usize,
    /// Similarity metric.
    pub metric: DistanceMetric,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 32,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl HnswConfig {
    /// Level multiplier for geometric level assignment: 1/ln(m).
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    pub fn validate(&self) -> VectorResult<()> {
        if self.m < 2 || self.m > 64 {
            return Err(VectorError::ConfigurationInvalid(format!(
                "m must be in 2..=64, got {}",
                self.m
            )));
        }
        if self.ef_construction < self.m {
            return Err(VectorError::ConfigurationInvalid(format!(
                "ef_construction ({}) must be >= m ({})",
                self.ef_construction, self.m
            )));
        }
        if self.ef_search == 0 {
            return Err(VectorError::ConfigurationInvalid(
                "ef_search must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Cluster router parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Target number of clusters for a full build.
    pub num_clusters: usize,
    /// Membership count above which a cluster is split.
    pub max_cluster_size: usize,
    /// Base probe count; adaptive probing starts from 2x this value.
    pub search_probe_count: usize,
    /// Similarity slack (relative to the best cluster) within which extra
    /// clusters are probed when adaptive probing is enabled.
    pub probe_threshold: f32,
    /// Whether to widen the probe set adaptively.
    pub adaptive_probing: bool,
    /// Hard ceiling on the adaptive probe count.
    pub max_probe_count: usize,
    /// Store member vectors scalar-quantized (u8) instead of f32.
    pub quantize_vectors: bool,
    /// Capacity of the hot-vector LRU cache used during scoring. Zero
    /// disables the cache.
    pub cache_capacity: usize,
    /// Parameters of the internal routing graph built over centroids.
    pub hnsw: HnswConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            num_clusters: 16,
            max_cluster_size: 512,
            search_probe_count: 4,
            probe_threshold: 0.05,
            adaptive_probing: true,
            max_probe_count: 16,
            quantize_vectors: false,
            cache_capacity: 1024,
            hnsw: HnswConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> VectorResult<()> {
        if self.num_clusters == 0 {
            return Err(VectorError::ConfigurationInvalid(
                "num_clusters must be positive".into(),
            ));
        }
        if self.max_cluster_size < 2 {
            return Err(VectorError::ConfigurationInvalid(format!(
                "max_cluster_size must be >= 2, got {}",
                self.max_cluster_size
            )));
        }
        if self.search_probe_count == 0 {
            return Err(VectorError::ConfigurationInvalid(
                "search_probe_count must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.probe_threshold) {
            return Err(VectorError::ConfigurationInvalid(format!(
                "probe_threshold must be in [0, 1], got {}",
                self.probe_threshold
            )));
        }
        if self.max_probe_count < self.search_probe_count {
            return Err(VectorError::ConfigurationInvalid(format!(
                "max_probe_count ({}) must be >= search_probe_count ({})",
                self.max_probe_count, self.search_probe_count
            )));
        }
        self.hnsw.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() {
        HnswConfig::default().validate().unwrap();
        RouterConfig::default().validate().unwrap();
    }

    #[test]
    fn test_hnsw_config_rejects_out_of_range_m() {
        let cfg = HnswConfig {
            m: 1,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(VectorError::ConfigurationInvalid(_))
        ));

        let cfg = HnswConfig {
            m: 65,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_hnsw_config_rejects_narrow_beam() {
        let cfg = HnswConfig {
            m: 16,
            ef_construction: 8,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(VectorError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn test_router_config_allows_disabled_cache() {
        let cfg = RouterConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_router_config_rejects_bad_threshold() {
        let cfg = RouterConfig {
            probe_threshold: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_level_mult() {
        let cfg = HnswConfig::default();
        assert!((cfg.level_mult() - 1.0 / (16f64).ln()).abs() < 1e-12);
    }
}
