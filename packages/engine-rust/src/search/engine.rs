//! The two-phase cold search: route to clusters, scan their partitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use ordered_float::OrderedFloat;
use terrace_core::{cosine_similarity, Vector, VectorEntry};
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::cluster::{ClusterIndex, ClusterRouter};
use crate::codec::{self, ReadOptions};
use crate::metrics::MetricsHub;

use super::ranking::{merge_hot_cold, merge_partitions, TopK};
use super::types::{SearchDiagnostic, SearchHit, SearchMetadata, SearchRequest, SearchResponse};
use super::{SearchConfig, SearchError};

/// A cluster picked by the router for this query.
#[derive(Debug, Clone)]
struct SelectedCluster {
    cluster_id: String,
    partition_key: String,
    similarity: f32,
}

enum PartitionScan {
    Ranked { hits: Vec<SearchHit>, scanned: u64 },
    Missing,
}

struct PartitionOutcome {
    partition_key: String,
    scan: PartitionScan,
}

/// Cluster-routed nearest-neighbour search over cold partitions.
///
/// Queries are embarrassingly parallel: partition fetches and decodes for
/// one query proceed independently, and the only shared state is metrics.
pub struct ColdSearchEngine {
    config: SearchConfig,
    router: Arc<dyn ClusterRouter>,
    blob: Arc<dyn BlobStore>,
    hub: MetricsHub,
}

impl std::fmt::Debug for ColdSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColdSearchEngine")
            .field("max_clusters", &self.config.max_clusters)
            .finish_non_exhaustive()
    }
}

impl ColdSearchEngine {
    /// Creates an engine over the given router and blob store.
    #[must_use]
    pub fn new(
        config: SearchConfig,
        router: Arc<dyn ClusterRouter>,
        blob: Arc<dyn BlobStore>,
        hub: MetricsHub,
    ) -> Self {
        Self {
            config,
            router,
            blob,
            hub,
        }
    }

    /// Answers a nearest-neighbour query.
    ///
    /// Missing, corrupt, or budget-expired partitions degrade into
    /// `metadata.missing_partitions`; the query only fails on a malformed
    /// request or cancellation. Result ordering is a total function of the
    /// query bits, the fetched partition bytes, and the id tie-break.
    ///
    /// # Errors
    ///
    /// [`SearchError::InvalidRequest`], [`SearchError::Cancelled`].
    pub async fn search(
        &self,
        request: SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, SearchError> {
        if request.limit == 0 {
            return Err(SearchError::InvalidRequest(
                "limit must be positive".to_string(),
            ));
        }
        if request.query_embedding.is_empty() {
            return Err(SearchError::InvalidRequest(
                "query embedding is empty".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let started = Instant::now();
        let timer = self.hub.timer("search.query_ms", &[]);
        let mut metadata = SearchMetadata::default();
        let mut cold_hits: Vec<SearchHit> = Vec::new();

        if request.include_cold {
            let index = self.router.cluster_index();
            let selected = self.select_clusters(&request, &index);

            if selected.is_empty() {
                metadata.diagnostic = Some(SearchDiagnostic::NoClustersSelected);
            } else {
                metadata.clusters_searched = selected
                    .iter()
                    .map(|cluster| cluster.cluster_id.clone())
                    .collect();

                match self.scan_selected(&request, &selected, &mut metadata, cancel).await {
                    Ok(hits) => cold_hits = hits,
                    Err(err) => {
                        timer.cancel();
                        return Err(err);
                    }
                }
            }
        }

        let results = match request.hot_results.clone() {
            Some(hot) => merge_hot_cold(
                hot,
                cold_hits,
                request.prefer_cold_similarity,
                request.limit,
            ),
            None => cold_hits,
        };

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        metadata.search_time_ms = elapsed_ms;
        self.hub.counter("search.queries", 1, &[]);
        self.hub.counter(
            "search.vectors_scanned",
            metadata.total_vectors_scanned,
            &[],
        );
        timer.stop();

        Ok(SearchResponse { results, metadata })
    }

    /// Ranks clusters by centroid cosine similarity, applies the threshold,
    /// and caps the scan set.
    fn select_clusters(
        &self,
        request: &SearchRequest,
        index: &ClusterIndex,
    ) -> Vec<SelectedCluster> {
        let threshold = request
            .cluster_similarity_threshold
            .unwrap_or(self.config.cluster_similarity_threshold);
        let cap = request
            .max_clusters
            .unwrap_or(self.config.max_clusters)
            .min(self.config.max_clusters);

        let mut ranked: Vec<SelectedCluster> = index
            .clusters
            .iter()
            .filter(|info| info.centroid.len() == request.query_embedding.len())
            .map(|info| SelectedCluster {
                cluster_id: info.cluster_id.clone(),
                partition_key: info.partition_key.clone(),
                similarity: cosine_similarity(&request.query_embedding, &info.centroid),
            })
            .filter(|cluster| cluster.similarity >= threshold)
            .collect();

        ranked.sort_by(|a, b| {
            OrderedFloat(b.similarity)
                .cmp(&OrderedFloat(a.similarity))
                .then_with(|| a.cluster_id.cmp(&b.cluster_id))
        });
        ranked.truncate(cap);
        ranked
    }

    /// Fetches and scans the selected partitions concurrently, within the
    /// query budget.
    async fn scan_selected(
        &self,
        request: &SearchRequest,
        selected: &[SelectedCluster],
        metadata: &mut SearchMetadata,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let deadline = tokio::time::Instant::now() + self.config.query_budget;

        let tasks = selected.iter().map(|cluster| {
            let blob = self.blob.clone();
            let query = request.query_embedding.clone();
            let namespace = request.namespace.clone();
            let kind = request.kind.clone();
            let limit = request.limit;
            let partition_key = cluster.partition_key.clone();
            async move {
                let scan = scan_partition(&*blob, &query, namespace, kind, limit, &partition_key)
                    .await;
                PartitionOutcome {
                    partition_key,
                    scan,
                }
            }
        });
        let mut stream =
            futures_util::stream::iter(tasks).buffer_unordered(self.config.fetch_concurrency);

        let mut outcomes: Vec<PartitionOutcome> = Vec::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // All-or-nothing: partial per-partition results are
                    // discarded with the stream.
                    return Err(SearchError::Cancelled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    metadata.timed_out = true;
                    break;
                }
                next = stream.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        let mut by_key: HashMap<String, PartitionScan> = outcomes
            .into_iter()
            .map(|outcome| (outcome.partition_key, outcome.scan))
            .collect();

        let mut parts: Vec<Vec<SearchHit>> = Vec::new();
        for cluster in selected {
            match by_key.remove(&cluster.partition_key) {
                Some(PartitionScan::Ranked { hits, scanned }) => {
                    metadata.total_vectors_scanned += scanned;
                    parts.push(hits);
                }
                // Missing, undecodable, or not back before the deadline.
                Some(PartitionScan::Missing) | None => {
                    metadata.missing_partitions.push(cluster.partition_key.clone());
                }
            }
        }

        Ok(merge_partitions(parts, request.limit))
    }
}

/// Fetches one partition (with a single retry on transport errors) and
/// ranks its vectors against the query.
async fn scan_partition(
    blob: &dyn BlobStore,
    query: &Vector,
    namespace: Option<String>,
    kind: Option<String>,
    limit: usize,
    partition_key: &str,
) -> PartitionScan {
    let fetched = match blob.get(partition_key).await {
        Ok(fetched) => fetched,
        Err(first) => {
            tracing::debug!(partition_key, error = %first, "partition fetch failed, retrying");
            match blob.get(partition_key).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    tracing::warn!(partition_key, error = %err, "partition fetch failed twice");
                    return PartitionScan::Missing;
                }
            }
        }
    };
    let Some(buffer) = fetched else {
        return PartitionScan::Missing;
    };

    let entries: Vec<VectorEntry> = match codec::deserialize(&buffer, &ReadOptions::default()) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(partition_key, error = %err, "partition undecodable, treated as missing");
            return PartitionScan::Missing;
        }
    };

    let mut scanned = 0u64;
    let mut top = TopK::new(limit);
    for entry in entries {
        if let Some(ns) = &namespace {
            if entry.metadata.namespace != *ns {
                continue;
            }
        }
        if let Some(kind) = &kind {
            if entry.metadata.kind.as_deref() != Some(kind.as_str()) {
                continue;
            }
        }
        if entry.embedding.len() != query.len() {
            continue;
        }

        scanned += 1;
        let similarity = cosine_similarity(query, &entry.embedding);
        top.push(SearchHit {
            id: entry.id.clone(),
            similarity,
            entry: Some(entry),
        });
    }

    PartitionScan::Ranked {
        hits: top.into_sorted(),
        scanned,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
