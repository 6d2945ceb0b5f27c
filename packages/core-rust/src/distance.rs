//! Distance metrics over embedding vectors.
//!
//! All metrics are normalised so that *smaller is nearer*: cosine distance is
//! `1 - similarity`, euclidean is the L2 norm of the difference, and dot
//! product is negated. Search results report cosine *similarity* (higher is
//! better); [`similarity_from_distance`] converts between the two.
//!
//! Under the cosine metric the engine assumes producers supply unit-length
//! vectors; incremental centroid updates are not re-normalised. The producer
//! contract is enforced at the write boundary via [`validate_unit_norm`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds for vector math at component boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistanceError {
    /// Vector length differs from the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cosine-metric input whose norm falls outside `[1 - eps, 1 + eps]`.
    #[error("vector is not unit length (norm {norm:.6}, tolerance {epsilon})")]
    NotUnitVector { norm: f32, epsilon: f32 },
}

/// The distance metric a deployment is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    /// `1 - (u . v) / (|u||v|)`; results surface as similarity `1 - d`.
    Cosine,
    /// L2 norm of `u - v`.
    Euclidean,
    /// `-(u . v)`, negated so smaller-is-nearer holds uniformly.
    DotProduct,
}

/// Default tolerance for the unit-norm producer contract under cosine.
pub const DEFAULT_UNIT_NORM_EPSILON: f32 = 1e-3;

/// Checks that `v` has the expected dimension.
///
/// # Errors
///
/// Returns [`DistanceError::DimensionMismatch`] when the length differs.
pub fn check_dimension(v: &[f32], expected: usize) -> Result<(), DistanceError> {
    if v.len() == expected {
        Ok(())
    } else {
        Err(DistanceError::DimensionMismatch {
            expected,
            actual: v.len(),
        })
    }
}

/// Validates the unit-norm producer contract for cosine-metric inputs.
///
/// # Errors
///
/// Returns [`DistanceError::NotUnitVector`] when `|v|` is outside
/// `[1 - epsilon, 1 + epsilon]`.
pub fn validate_unit_norm(v: &[f32], epsilon: f32) -> Result<(), DistanceError> {
    let norm = l2_norm(v);
    if (norm - 1.0).abs() > epsilon {
        return Err(DistanceError::NotUnitVector { norm, epsilon });
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
#[must_use]
pub fn dot(u: &[f32], v: &[f32]) -> f32 {
    u.iter().zip(v.iter()).map(|(a, b)| a * b).sum()
}

/// L2 norm of a vector.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine similarity in `[-1, 1]`.
///
/// A zero-norm operand yields similarity `0.0` (orthogonal by convention),
/// keeping the result finite for degenerate inputs.
#[must_use]
pub fn cosine_similarity(u: &[f32], v: &[f32]) -> f32 {
    let denom = l2_norm(u) * l2_norm(v);
    if denom == 0.0 {
        return 0.0;
    }
    dot(u, v) / denom
}

/// Distance between two vectors under the given metric.
///
/// # Errors
///
/// Returns [`DistanceError::DimensionMismatch`] when lengths differ.
pub fn distance(metric: DistanceMetric, u: &[f32], v: &[f32]) -> Result<f32, DistanceError> {
    check_dimension(v, u.len())?;
    let d = match metric {
        DistanceMetric::Cosine => 1.0 - cosine_similarity(u, v),
        DistanceMetric::Euclidean => {
            let sq: f32 = u
                .iter()
                .zip(v.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            sq.sqrt()
        }
        DistanceMetric::DotProduct => -dot(u, v),
    };
    Ok(d)
}

/// Converts a stored distance back to the similarity surfaced in results.
///
/// Only meaningful for the cosine metric, where similarity is `1 - distance`.
#[must_use]
pub fn similarity_from_distance(metric: DistanceMetric, d: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - d,
        // Euclidean / dot-product deployments rank by raw distance; surface
        // the negated distance so higher-is-better holds for consumers.
        DistanceMetric::Euclidean | DistanceMetric::DotProduct => -d,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
