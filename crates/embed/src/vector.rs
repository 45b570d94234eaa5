//! Vector algebra over `f32` embeddings.
//!
//! Everything here accumulates in `f64` and only narrows back to `f32` when a
//! new vector is produced, so rounding error does not grow with the
//! dimensionality. Mismatched lengths never panic; they yield sentinel values
//! (`0.0` for dot/cosine, `f64::MAX` for Euclidean distance) and callers that
//! need a hard error must compare lengths themselves.

use serde::{Deserialize, Serialize};

/// An embedding vector. `f32` matches what vector stores expect.
pub type Vector = Vec<f32>;

/// How two vectors are compared by [`similarity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine of the angle between the vectors.
    #[default]
    Cosine,
    /// Raw dot product.
    DotProduct,
    /// `1 / (1 + euclidean_distance)`.
    Euclidean,
}

/// L2 norm (magnitude).
pub fn norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Returns a unit-length copy of `v`. The zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vector {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

/// In-place L2 normalization helper to keep allocations down during hot paths.
pub fn normalize_in_place(v: &mut [f32]) {
    let n = norm(v);
    if n == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x = (f64::from(*x) / n) as f32;
    }
}

/// Dot product; `0.0` when the lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for mismatched lengths or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Euclidean distance; `f64::MAX` when the lengths differ.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::MAX;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let diff = f64::from(x) - f64::from(y);
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// Similarity under `metric`. Euclidean distance is mapped to `1 / (1 + d)`
/// so that identical vectors score `1.0` and larger distances score lower.
pub fn similarity(a: &[f32], b: &[f32], metric: SimilarityMetric) -> f64 {
    match metric {
        SimilarityMetric::Cosine => cosine_similarity(a, b),
        SimilarityMetric::DotProduct => dot(a, b),
        SimilarityMetric::Euclidean => 1.0 / (1.0 + euclidean_distance(a, b)),
    }
}

/// Method-call sugar for the free functions in this module.
pub trait VectorExt {
    fn norm(&self) -> f64;
    fn normalized(&self) -> Vector;
    fn dot(&self, other: &[f32]) -> f64;
    fn cosine_similarity(&self, other: &[f32]) -> f64;
    fn euclidean_distance(&self, other: &[f32]) -> f64;
    fn similarity(&self, other: &[f32], metric: SimilarityMetric) -> f64;
}

impl VectorExt for [f32] {
    fn norm(&self) -> f64 {
        norm(self)
    }

    fn normalized(&self) -> Vector {
        normalize(self)
    }

    fn dot(&self, other: &[f32]) -> f64 {
        dot(self, other)
    }

    fn cosine_similarity(&self, other: &[f32]) -> f64 {
        cosine_similarity(self, other)
    }

    fn euclidean_distance(&self, other: &[f32]) -> f64 {
        euclidean_distance(self, other)
    }

    fn similarity(&self, other: &[f32], metric: SimilarityMetric) -> f64 {
        similarity(self, other, metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-4;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn norm_of_three_four_is_five() {
        assert!(approx(norm(&[3.0, 4.0]), 5.0));
    }

    #[test]
    fn normalize_simple_vector() {
        let v = normalize(&[3.0, 4.0]);
        // L2 norm of [3, 4] is 5, so normalized should be [0.6, 0.8]
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_maintains_unit_length() {
        let samples: [&[f32]; 4] = [
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[-1.0, 2.0, -3.0, 4.0],
            &[1e-10, 1e-10, 1e-10],
            &[5.0],
        ];
        for v in samples {
            assert!(approx(norm(&normalize(v)), 1.0), "norm drifted for {v:?}");
        }
    }

    #[test]
    fn normalize_large_vector() {
        let v: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        assert!(approx(v.normalized().norm(), 1.0));
    }

    #[test]
    fn normalize_zero_vector_is_fixed_point() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        let mut empty: Vec<f32> = vec![];
        normalize_in_place(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn normalize_does_not_touch_input() {
        let original = vec![1.0f32, 2.0, 3.0];
        let _ = normalize(&original);
        assert_eq!(original, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn normalize_preserves_direction() {
        let v = normalize(&[1.0, 2.0, 3.0]);
        assert!(((v[1] / v[0]) - 2.0).abs() < 1e-5);
        assert!(((v[2] / v[0]) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn dot_is_symmetric() {
        let a = [0.5f32, -1.25, 3.0, 7.5];
        let b = [2.0f32, 0.75, -1.0, 0.125];
        assert_eq!(dot(&a, &b), dot(&b, &a));
        assert!(approx(dot(&a, &b), 1.0 - 0.9375 - 3.0 + 0.9375));
    }

    #[test]
    fn euclidean_is_symmetric_and_zero_on_self() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [4.0f32, 6.0, 3.0];
        assert_eq!(euclidean_distance(&a, &b), euclidean_distance(&b, &a));
        assert!(approx(euclidean_distance(&a, &b), 5.0));
        assert_eq!(euclidean_distance(&a, &a), 0.0);
    }

    #[test]
    fn cosine_orthogonal_identical_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);

        let v = [0.3f32, -1.2, 4.5];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!(approx(cosine_similarity(&v, &v), 1.0));
        assert!(approx(cosine_similarity(&v, &neg), -1.0));
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    // Mismatched dimensions are lenient on purpose: these sentinels are part
    // of the contract and callers are expected to check lengths themselves.
    #[test]
    fn mismatched_lengths_return_sentinels() {
        let a = [1.0f32, 2.0];
        let b = [1.0f32, 2.0, 3.0];
        assert_eq!(dot(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(euclidean_distance(&a, &b), f64::MAX);
        assert!(similarity(&a, &b, SimilarityMetric::Euclidean) < 1e-300);
    }

    #[test]
    fn similarity_dispatches_by_metric() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        assert!(approx(similarity(&a, &b, SimilarityMetric::Cosine), 1.0));
        assert!(approx(similarity(&a, &b, SimilarityMetric::DotProduct), 1.0));
        assert!(approx(similarity(&a, &b, SimilarityMetric::Euclidean), 1.0));

        let far = [4.0f32, 0.0];
        assert!(approx(similarity(&a, &far, SimilarityMetric::Euclidean), 0.25));
    }

    #[test]
    fn extension_trait_matches_free_functions() {
        let a: Vector = vec![1.0, 2.0, 2.0];
        let b: Vector = vec![2.0, 1.0, 2.0];
        assert_eq!(a.norm(), norm(&a));
        assert_eq!(a.dot(&b), dot(&a, &b));
        assert_eq!(a.cosine_similarity(&b), cosine_similarity(&a, &b));
        assert_eq!(a.euclidean_distance(&b), euclidean_distance(&a, &b));
        assert_eq!(
            a.similarity(&b, SimilarityMetric::DotProduct),
            dot(&a, &b)
        );
    }

    #[test]
    fn metric_deserializes_from_snake_case() {
        let metric: SimilarityMetric = serde_json::from_str("\"dot_product\"").unwrap();
        assert_eq!(metric, SimilarityMetric::DotProduct);
        assert_eq!(SimilarityMetric::default(), SimilarityMetric::Cosine);
    }
}
