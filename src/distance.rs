//! Similarity kernels.
//!
//! All scores are normalized to "higher = more similar": cosine in [-1, 1],
//! euclidean mapped through 1/(1 + distance) into (0, 1]. Vectors are used
//! as-is; nothing here normalizes its inputs.

use crate::types::DistanceMetric;

/// Similarity between two vectors under the given metric.
pub fn compute_similarity(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch in similarity");
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::Euclidean => euclidean_similarity(a, b),
    }
}

/// Cosine similarity: dot(a,b) / (|a| * |b|).
///
/// Returns 0.0 if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_prenorm(a, b, l2_norm(a), l2_norm(b))
}

/// Cosine similarity with both norms supplied by the caller.
///
/// The graph index caches node magnitudes, so the hot search path only ever
/// computes the query norm once per call.
pub fn cosine_prenorm(a: &[f32], b: &[f32], norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / (norm_a * norm_b)
}

/// Euclidean similarity: 1 / (1 + l2_distance).
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> f32 {
    1.0 / (1.0 + euclidean_distance(a, b))
}

/// Dot product (inner product).
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm (Euclidean length).
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2 distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Squared L2 distance. Used by k-means++ seeding, where only ordering and
/// proportionality matter.
pub fn euclidean_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_guard() {
        let zero = vec![0.0, 0.0];
        let v = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }

    #[test]
    fn test_cosine_prenorm_matches_direct() {
        let a = vec![0.3, -1.2, 2.0];
        let b = vec![1.1, 0.4, -0.7];
        let direct = cosine_similarity(&a, &b);
        let pre = cosine_prenorm(&a, &b, l2_norm(&a), l2_norm(&b));
        assert!((direct - pre).abs() < 1e-7);
    }

    #[test]
    fn test_euclidean_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((euclidean_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distant_vectors() {
        let a = vec![0.0, 0.0];
        let b = vec![100.0, 0.0];
        let sim = euclidean_similarity(&a, &b);
        assert!(sim > 0.0 && sim < 0.01);
    }

    #[test]
    fn test_distance_sq_consistent() {
        let a = vec![1.0, 2.0];
        let b = vec![4.0, 6.0];
        let d = euclidean_distance(&a, &b);
        assert!((euclidean_distance_sq(&a, &b) - d * d).abs() < 1e-5);
    }

    #[test]
    fn test_compute_similarity_dispatch() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(compute_similarity(&a, &b, DistanceMetric::Cosine).abs() < 1e-6);
        let e = compute_similarity(&a, &b, DistanceMetric::Euclidean);
        assert!(e > 0.0 && e < 1.0);
    }
}
