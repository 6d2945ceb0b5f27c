//! Cluster domain types: centroids, assignments, statistics, and the
//! routing index.
//!
//! These are the cluster manager's data model. The search engine never
//! touches manager internals; it routes queries off the immutable
//! [`ClusterIndex`] snapshot exposed through [`ClusterRouter`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use terrace_core::Vector;

/// One cluster's centroid: the arithmetic mean of member vectors at last
/// update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Centroid {
    pub cluster_id: String,
    /// Mean vector; `vector.len() == dimension` always holds.
    pub vector: Vector,
    pub dimension: usize,
    /// Count of vectors currently folded into the mean.
    pub vector_count: u64,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Last incremental update, unix milliseconds.
    pub updated_at: i64,
}

/// The current placement of one vector: exactly one per vector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAssignment {
    pub vector_id: String,
    pub cluster_id: String,
    /// Distance to the centroid under the configured metric, at assignment
    /// time.
    pub distance: f32,
    /// Assignment time, unix milliseconds.
    pub assigned_at: i64,
}

/// Derived per-cluster summary, recomputed from current assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub cluster_id: String,
    pub vector_count: u64,
    pub average_distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// The centroid's last update time, unix milliseconds.
    pub last_updated: i64,
}

/// One cluster as seen by the query router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub centroid: Vector,
    pub vector_count: u64,
    /// Blob-store key of the cluster's cold partition.
    pub partition_key: String,
}

/// Immutable top-level directory of the cluster set.
///
/// Replaced atomically on cluster-set mutation (copy-on-write); readers
/// observe either the pre- or post-mutation snapshot, never a torn view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIndex {
    /// Monotonic snapshot version.
    pub version: u64,
    pub cluster_count: usize,
    pub total_vectors: u64,
    /// Clusters sorted ascending by `cluster_id`.
    pub clusters: Vec<ClusterInfo>,
}

impl ClusterIndex {
    /// An empty index at version 0, for cores that have not bootstrapped.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            cluster_count: 0,
            total_vectors: 0,
            clusters: Vec::new(),
        }
    }
}

/// Read-side seam between the cluster manager and the search engine.
///
/// Injected by construction; the search engine holds no reference to the
/// manager's mutable state.
pub trait ClusterRouter: Send + Sync {
    /// The current cluster index snapshot.
    fn cluster_index(&self) -> Arc<ClusterIndex>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_has_no_clusters() {
        let index = ClusterIndex::empty();
        assert_eq!(index.version, 0);
        assert_eq!(index.cluster_count, 0);
        assert!(index.clusters.is_empty());
    }

    #[test]
    fn assignment_serializes_camel_case() {
        let assignment = ClusterAssignment {
            vector_id: "v1".to_string(),
            cluster_id: "c0".to_string(),
            distance: 0.25,
            assigned_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&assignment).unwrap();
        assert_eq!(json["vectorId"], "v1");
        assert_eq!(json["clusterId"], "c0");
        assert!(json["assignedAt"].is_i64());
    }
}
