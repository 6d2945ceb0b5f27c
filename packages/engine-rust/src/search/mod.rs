//! Cold search: cluster-routed approximate nearest-neighbour queries over
//! Parquet partitions, plus the ingest side that builds those partitions.
//!
//! The read path degrades gracefully: a missing or undecodable partition is
//! recorded in the response metadata and never fails the query. The ingest
//! path is strict: any failure aborts the batch.

use std::time::Duration;

use thiserror::Error;

mod engine;
mod ingest;
mod ranking;
mod types;

pub use engine::ColdSearchEngine;
pub use ingest::{AssignmentLookup, IngestorConfig, PartitionIngestor};
pub use ranking::merge_hot_cold;
pub use types::{SearchDiagnostic, SearchHit, SearchMetadata, SearchRequest, SearchResponse};

/// Error kinds surfaced by the search read path.
///
/// Per-partition I/O and decode failures are *not* errors; they land in
/// [`SearchMetadata::missing_partitions`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Malformed request (zero limit, empty query vector).
    #[error("invalid search request: {0}")]
    InvalidRequest(String),

    /// The caller's cancellation signal fired; partial work is discarded.
    #[error("search cancelled")]
    Cancelled,

    /// A backing store exceeded its deadline on a non-degradable path.
    #[error("backend timeout")]
    BackendTimeout,
}

/// Cold search engine configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Cap on clusters scanned per query; request values are clamped to it.
    pub max_clusters: usize,
    /// Minimum centroid similarity for a cluster to be worth scanning.
    pub cluster_similarity_threshold: f32,
    /// Result count used when the request leaves `limit` defaulted.
    pub default_limit: usize,
    /// Per-query wall budget; overruns return best-effort results.
    pub query_budget: Duration,
    /// Concurrent partition fetches per query.
    pub fetch_concurrency: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_clusters: 10,
            cluster_similarity_threshold: 0.0,
            default_limit: 10,
            query_budget: Duration::from_secs(5),
            fetch_concurrency: 8,
        }
    }
}
