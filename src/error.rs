//! Error types for index operations.
//!
//! Structural and input errors on mutation are raised synchronously and leave
//! index state unchanged. Integrity issues found while loading a serialized
//! document are surfaced as warnings instead (an approximate index that loads
//! degraded beats one that refuses to load); only structurally unusable input
//! becomes a hard [`VectorError::CorruptedSerialization`].

use thiserror::Error;

/// Errors produced by the graph index, the cluster router, and the
/// serialization layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VectorError {
    /// Id is negative, already present, or not present, depending on context.
    #[error("invalid id {id}: {reason}")]
    InvalidId { id: String, reason: IdFault },

    /// A zero-length vector was supplied.
    #[error("vector must not be empty")]
    EmptyVector,

    /// Vector length differs from the dimension fixed by the first insert.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Operation attempted on a router that has not been built yet.
    #[error("index must be built before this operation")]
    BuildRequired,

    /// Serialized document is structurally unusable (not merely inconsistent).
    #[error("corrupted serialized document: {0}")]
    CorruptedSerialization(String),

    /// Configuration parameter outside its accepted range.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

/// Why an id was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFault {
    Negative,
    Duplicate,
    Unknown,
}

impl std::fmt::Display for IdFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdFault::Negative => write!(f, "ids must be non-negative"),
            IdFault::Duplicate => write!(f, "id already present"),
            IdFault::Unknown => write!(f, "id not present"),
        }
    }
}

impl VectorError {
    pub(crate) fn invalid_id(id: impl ToString, reason: IdFault) -> Self {
        VectorError::InvalidId {
            id: id.to_string(),
            reason,
        }
    }
}

/// Result alias used throughout the crate.
pub type VectorResult<T> = Result<T, VectorError>;
