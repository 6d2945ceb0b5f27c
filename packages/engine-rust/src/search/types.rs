//! Search request/response payloads.

use serde::{Deserialize, Serialize};
use terrace_core::{Vector, VectorEntry};

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity to the query, higher is better.
    pub similarity: f32,
    /// Full payload for cold hits; hot-tier hits may carry none (the hot
    /// index can be a reduced sketch).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entry: Option<VectorEntry>,
}

impl SearchHit {
    /// A payload-less hit, the shape hot indexes supply.
    #[must_use]
    pub fn bare(id: impl Into<String>, similarity: f32) -> Self {
        Self {
            id: id.into(),
            similarity,
            entry: None,
        }
    }
}

/// A nearest-neighbour query over the cold corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query_embedding: Vector,
    /// Results to return; must be positive.
    pub limit: usize,
    /// Per-request cluster cap, clamped to the engine's configured cap.
    pub max_clusters: Option<usize>,
    /// Per-request routing threshold override, in `[-1, 1]`.
    pub cluster_similarity_threshold: Option<f32>,
    /// Mandatory equality filter when supplied.
    pub namespace: Option<String>,
    /// Optional equality filter on the entry type.
    pub kind: Option<String>,
    /// Scan cold partitions at all.
    pub include_cold: bool,
    /// Externally-supplied hot-tier results to merge.
    pub hot_results: Option<Vec<SearchHit>>,
    /// On id collision between tiers, take the cold similarity instead of
    /// the hot one. The cold payload is kept either way.
    pub prefer_cold_similarity: bool,
}

impl SearchRequest {
    /// A cold-only request with the given query and limit.
    #[must_use]
    pub fn new(query_embedding: Vector, limit: usize) -> Self {
        Self {
            query_embedding,
            limit,
            max_clusters: None,
            cluster_similarity_threshold: None,
            namespace: None,
            kind: None,
            include_cold: true,
            hot_results: None,
            prefer_cold_similarity: false,
        }
    }

    /// Scopes the query to one namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Filters results to one entry type.
    #[must_use]
    pub fn of_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Supplies hot-tier results for the merge step.
    #[must_use]
    pub fn with_hot_results(mut self, hot_results: Vec<SearchHit>) -> Self {
        self.hot_results = Some(hot_results);
        self
    }
}

/// Why a query produced no cold candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchDiagnostic {
    /// The similarity threshold eliminated every cluster.
    NoClustersSelected,
}

/// Per-query diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    /// Clusters selected for scanning, in routing order.
    pub clusters_searched: Vec<String>,
    /// Vectors compared against the query across all decoded partitions.
    pub total_vectors_scanned: u64,
    pub search_time_ms: u64,
    /// Partition keys that could not be fetched or decoded.
    pub missing_partitions: Vec<String>,
    /// The query budget expired; results are best-effort.
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diagnostic: Option<SearchDiagnostic>,
}

/// Ordered results plus diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub metadata: SearchMetadata,
}
