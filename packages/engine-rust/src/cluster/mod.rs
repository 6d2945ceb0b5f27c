//! Cluster management: k-means centroids over the corpus, vector
//! assignment, and the routing index for partition-routed search.

use serde::{Deserialize, Serialize};
use terrace_core::{DistanceError, DistanceMetric, DEFAULT_UNIT_NORM_EPSILON};
use thiserror::Error;

mod kmeans;
mod manager;
mod types;

pub use manager::{ClusterManager, ReclusterOutcome};
pub use types::{
    Centroid, ClusterAssignment, ClusterIndex, ClusterInfo, ClusterRouter, ClusterStats,
};

/// Error kinds surfaced by the cluster manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    /// Vector length differs from the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cosine-metric input violating the unit-length producer contract.
    #[error("vector is not unit length (norm {norm:.6})")]
    NotUnitVector { norm: f32 },

    /// Fewer seed vectors than clusters.
    #[error("need at least {needed} seed vectors, got {got}")]
    InsufficientSeeds { needed: usize, got: usize },

    /// A centroid set already exists; use `recluster` to replace it.
    #[error("centroids already initialised")]
    AlreadyInitialised,

    /// No centroid set exists yet.
    #[error("centroids not initialised")]
    NotInitialised,

    /// Stats or routing requested for an absent cluster id.
    #[error("unknown cluster '{0}'")]
    UnknownCluster(String),

    /// Reassign requested for a vector with no current assignment.
    #[error("no assignment exists for vector '{0}'")]
    UnknownVector(String),

    /// A re-clustering run is in flight; the caller retries.
    #[error("cluster manager is re-clustering, retry later")]
    Busy,
}

impl From<DistanceError> for ClusterError {
    fn from(err: DistanceError) -> Self {
        match err {
            DistanceError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            DistanceError::NotUnitVector { norm, .. } => Self::NotUnitVector { norm },
        }
    }
}

/// Configuration for the cluster manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Number of clusters (k).
    pub num_clusters: usize,
    /// Embedding dimension every vector must match.
    pub dimension: usize,
    /// Assignment distance metric.
    pub metric: DistanceMetric,
    /// Fold assigned vectors into the centroid running mean.
    pub enable_incremental_updates: bool,
    /// Prefix for cold partition blob keys.
    pub partition_key_prefix: String,
    /// Tolerance for the cosine unit-norm producer contract.
    pub unit_norm_epsilon: f32,
    /// Lloyd iteration cap for `recluster`.
    pub max_iterations: usize,
    /// Lloyd convergence tolerance (mean centroid movement).
    pub tolerance: f32,
}

impl ClusterConfig {
    /// Defaults: cosine metric, incremental updates on, `clusters/` key
    /// prefix, 25 Lloyd iterations at 1e-4 tolerance.
    #[must_use]
    pub fn new(num_clusters: usize, dimension: usize) -> Self {
        Self {
            num_clusters,
            dimension,
            metric: DistanceMetric::Cosine,
            enable_incremental_updates: true,
            partition_key_prefix: "clusters".to_string(),
            unit_norm_epsilon: DEFAULT_UNIT_NORM_EPSILON,
            max_iterations: 25,
            tolerance: 1e-4,
        }
    }
}
