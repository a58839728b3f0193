//! Approximate nearest-neighbor search over dense f32 vectors.
//!
//! Two complementary index tiers:
//!
//! - [`HnswIndex`]: a hierarchical navigable small-world proximity graph
//!   with logarithmic-ish search, soft deletes and explicit pruning. Ids
//!   are caller-assigned non-negative integers.
//! - [`ClusterRouter`]: a clustered two-tier index for larger collections.
//!   K-means partitions string-keyed records into clusters; a small HNSW
//!   graph over the centroids routes each query to a few probed clusters,
//!   whose members are scored exhaustively. Storage is optionally
//!   scalar-quantized with an LRU dequantization cache in front.
//!
//! Both tiers serialize to versioned, checksummed JSON documents (see
//! [`snapshot`]) and load older pre-versioned snapshots via migration.
//!
//! Indexes are single-writer: mutation requires `&mut`, searches take
//! `&self` and may run concurrently.
//!
//! ```
//! use annex::{HnswConfig, HnswIndex};
//!
//! let mut index = HnswIndex::new(HnswConfig::default())?;
//! index.insert(0, vec![1.0, 0.0])?;
//! index.insert(1, vec![0.0, 1.0])?;
//! let hits = index.search(&[0.9, 0.1], 1, None)?;
//! assert_eq!(hits[0].id, 0);
//! # Ok::<(), annex::VectorError>(())
//! ```

pub mod cache;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod node;
pub mod quantization;
pub mod router;
pub mod snapshot;
pub mod types;

mod pool;
mod rng;

pub use cache::HotVectorCache;
pub use error::{IdFault, VectorError, VectorResult};
pub use hnsw::{BuildProgress, HnswIndex, SearchHit};
pub use quantization::{QuantizedVector, ScalarQuantizer};
pub use router::{Centroid, ClusterRouter, RouterMatch};
pub use snapshot::{
    DocumentMetadata, DocumentVersion, GraphDocument, RouterDocument, SNAPSHOT_VERSION,
};
pub use types::{ClusterId, DistanceMetric, HnswConfig, NodeId, RouterConfig, EMPTY_SLOT};
