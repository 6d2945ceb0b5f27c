//! k-means++ seeding and Lloyd's algorithm.
//!
//! Pure functions over borrowed vector slices; the manager owns locking and
//! state swaps. Seeding weights and the convergence test use euclidean
//! geometry regardless of the configured assignment metric: for the
//! unit-length vectors the cosine deployment requires, euclidean and cosine
//! order neighbours identically (`|u - v|^2 = 2 - 2 cos`), and the mean
//! update at the heart of Lloyd's is euclidean by construction.

use rand::Rng;

use terrace_core::Vector;

fn squared_euclidean(u: &[f32], v: &[f32]) -> f32 {
    u.iter()
        .zip(v.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Index of the nearest centroid by squared euclidean distance, ties to the
/// lowest index.
fn nearest_index(vector: &[f32], centroids: &[Vector]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let d = squared_euclidean(vector, centroid);
        if d < best_distance {
            best_distance = d;
            best = index;
        }
    }
    best
}

/// k-means++ seeding: one uniform pick, then each next centroid with
/// probability proportional to the squared distance to the nearest
/// already-chosen centroid.
///
/// Callers guarantee `vectors.len() >= k` and `k > 0`.
pub(crate) fn kmeans_pp_seed<R: Rng>(vectors: &[Vector], k: usize, rng: &mut R) -> Vec<Vector> {
    let mut centroids: Vec<Vector> = Vec::with_capacity(k);
    centroids.push(vectors[rng.random_range(0..vectors.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = vectors
            .iter()
            .map(|v| {
                centroids
                    .iter()
                    .map(|c| squared_euclidean(v, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let total: f32 = weights.iter().sum();

        let picked = if total <= 0.0 {
            // All remaining mass sits on already-chosen points; fall back to
            // a uniform pick.
            rng.random_range(0..vectors.len())
        } else {
            let mut threshold = rng.random_range(0.0..total);
            let mut picked = vectors.len() - 1;
            for (index, weight) in weights.iter().enumerate() {
                if threshold < *weight {
                    picked = index;
                    break;
                }
                threshold -= weight;
            }
            picked
        };
        centroids.push(vectors[picked].clone());
    }

    centroids
}

/// Outcome of a Lloyd's run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LloydOutcome {
    /// Final centroid vectors, `k` of them.
    pub centroids: Vec<Vector>,
    /// Iterations actually executed.
    pub iterations: usize,
    /// Whether mean centroid movement fell below tolerance.
    pub converged: bool,
}

/// Lloyd's algorithm to convergence or `max_iterations`.
///
/// Convergence test: mean euclidean centroid movement below `tolerance`.
/// A cluster that loses all members keeps its previous centroid.
///
/// Callers guarantee `vectors.len() >= k` and `k > 0`.
pub(crate) fn lloyd<R: Rng>(
    vectors: &[Vector],
    k: usize,
    max_iterations: usize,
    tolerance: f32,
    rng: &mut R,
) -> LloydOutcome {
    let dimension = vectors[0].len();
    let mut centroids = kmeans_pp_seed(vectors, k, rng);

    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        // Assignment step.
        let mut sums: Vec<Vector> = vec![vec![0.0; dimension]; k];
        let mut counts: Vec<u64> = vec![0; k];
        for vector in vectors {
            let index = nearest_index(vector, &centroids);
            for (slot, value) in sums[index].iter_mut().zip(vector.iter()) {
                *slot += value;
            }
            counts[index] += 1;
        }

        // Update step; track mean movement for the convergence test.
        let mut total_movement = 0.0f32;
        for index in 0..k {
            if counts[index] == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let count = counts[index] as f32;
            let updated: Vector = sums[index].iter().map(|sum| sum / count).collect();
            total_movement += squared_euclidean(&updated, &centroids[index]).sqrt();
            centroids[index] = updated;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean_movement = total_movement / k as f32;
        if mean_movement < tolerance {
            converged = true;
            break;
        }
    }

    LloydOutcome {
        centroids,
        iterations,
        converged,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    /// Three tight blobs around distinct corners of the unit cube.
    fn three_blobs() -> Vec<Vector> {
        let mut vectors = Vec::new();
        for i in 0..10 {
            #[allow(clippy::cast_precision_loss)]
            let jitter = (i as f32) * 0.001;
            vectors.push(vec![1.0 + jitter, 0.0, 0.0]);
            vectors.push(vec![0.0, 1.0 + jitter, 0.0]);
            vectors.push(vec![0.0, 0.0, 1.0 + jitter]);
        }
        vectors
    }

    #[test]
    fn seeding_produces_k_centroids() {
        let mut rng = StdRng::seed_from_u64(7);
        let centroids = kmeans_pp_seed(&three_blobs(), 3, &mut rng);
        assert_eq!(centroids.len(), 3);
        for centroid in &centroids {
            assert_eq!(centroid.len(), 3);
        }
    }

    #[test]
    fn seeding_spreads_over_distinct_blobs() {
        // With well-separated blobs, k-means++ should pick one seed per
        // blob: every pair of seeds must be far apart.
        let mut rng = StdRng::seed_from_u64(7);
        let centroids = kmeans_pp_seed(&three_blobs(), 3, &mut rng);
        for (i, a) in centroids.iter().enumerate() {
            for b in centroids.iter().skip(i + 1) {
                assert!(squared_euclidean(a, b) > 0.5);
            }
        }
    }

    #[test]
    fn seeding_with_duplicate_points_falls_back_to_uniform() {
        let vectors: Vec<Vector> = (0..5).map(|_| vec![1.0, 0.0]).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let centroids = kmeans_pp_seed(&vectors, 3, &mut rng);
        assert_eq!(centroids.len(), 3);
    }

    #[test]
    fn lloyd_converges_on_separated_blobs() {
        let mut rng = StdRng::seed_from_u64(42);
        let outcome = lloyd(&three_blobs(), 3, 25, 1e-4, &mut rng);

        assert!(outcome.converged);
        assert!(outcome.iterations <= 25);

        // Each blob corner should have a centroid within its jitter radius.
        for corner in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
            let nearest = outcome
                .centroids
                .iter()
                .map(|c| squared_euclidean(c, &corner))
                .fold(f32::INFINITY, f32::min);
            assert!(nearest < 0.01, "no centroid near corner {corner:?}");
        }
    }

    #[test]
    fn lloyd_respects_iteration_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = lloyd(&three_blobs(), 3, 1, 0.0, &mut rng);
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.converged);
    }

    #[test]
    fn lloyd_single_cluster_is_global_mean() {
        let vectors = vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![0.0, 2.0], vec![2.0, 2.0]];
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = lloyd(&vectors, 1, 25, 1e-4, &mut rng);

        assert!((outcome.centroids[0][0] - 1.0).abs() < 1e-5);
        assert!((outcome.centroids[0][1] - 1.0).abs() < 1e-5);
    }
}
