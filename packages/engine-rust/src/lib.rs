//! Terrace Engine -- the hybrid two-tier vector search core.
//!
//! Subsystems, leaves first:
//!
//! - **Blob** ([`blob`]): GET/HEAD/LIST contract over the cold object
//!   store, with in-memory and local-filesystem implementations
//! - **Codec** ([`codec`]): row-group-batched Parquet encode/decode for
//!   vector partitions and graph records, footer-only metadata reads
//! - **Events** ([`events`]): per-stream monotonic append logs with
//!   optimistic concurrency and pluggable serialization
//! - **Cluster** ([`cluster`]): k-means centroids, vector assignment,
//!   and the copy-on-write routing index
//! - **Tier** ([`tier`]): the placement index and the hot/warm/cold
//!   migration policy engine
//! - **Search** ([`search`]): cluster-routed cold search and the
//!   partition ingest side
//! - **Metrics** ([`metrics`]): prefixed/tagged emission and scoped error
//!   boundaries
//! - **Core** ([`core`]): the explicit handle that owns and wires all of
//!   the above; no process-wide state anywhere

pub mod blob;
pub mod cluster;
pub mod codec;
pub mod core;
pub mod events;
pub mod metrics;
pub mod search;
pub mod tier;

pub use crate::core::{Core, CoreConfig, CoreError, HotStore};
pub use blob::{BlobError, BlobMeta, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use cluster::{
    ClusterAssignment, ClusterConfig, ClusterError, ClusterIndex, ClusterManager, ClusterRouter,
};
pub use codec::{CodecError, Compression, EncodedFile, FileMetadata, ReadOptions, WriteOptions};
pub use events::{AppendEventInput, EventSink, EventStore, EventStoreError, StreamEvent};
pub use crate::metrics::{ErrorBoundary, ErrorBoundaryConfig, MetricsHub};
pub use search::{
    ColdSearchEngine, PartitionIngestor, SearchConfig, SearchError, SearchHit, SearchRequest,
    SearchResponse,
};
pub use tier::{
    MigrationEngine, MigrationEngineConfig, MigrationPolicyConfig, Tier, TierIndex,
    TierIndexEntry, TierIndexError,
};


/// Integration tests across subsystems: the cluster manager routing real
/// searches, with partitions built by the real ingestor.
#[cfg(test)]
mod integration_tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use terrace_core::{DistanceMetric, EntryMetadata, ManualClock, SourceTable, VectorEntry};
    use tokio_util::sync::CancellationToken;

    use crate::blob::MemoryBlobStore;
    use crate::cluster::{ClusterConfig, ClusterManager};
    use crate::metrics::MetricsHub;
    use crate::search::{
        ColdSearchEngine, IngestorConfig, PartitionIngestor, SearchConfig, SearchRequest,
    };

    fn make_entry(id: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            embedding,
            source_table: SourceTable::Things,
            source_rowid: 0,
            metadata: EntryMetadata::for_namespace("ns"),
        }
    }

    #[tokio::test]
    async fn manager_routed_search_over_ingested_partitions() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let manager = Arc::new(ClusterManager::with_parts(
            ClusterConfig {
                metric: DistanceMetric::Euclidean,
                ..ClusterConfig::new(2, 2)
            },
            None,
            clock.clone(),
        ));
        manager
            .initialise_centroids(&[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();

        // Two blobs of vectors, one near each axis.
        let corpus = vec![
            make_entry("x1", vec![0.9, 0.1]),
            make_entry("x2", vec![0.8, 0.0]),
            make_entry("y1", vec![0.1, 0.9]),
            make_entry("y2", vec![0.0, 0.8]),
        ];
        let mut buckets: BTreeMap<String, Vec<VectorEntry>> = BTreeMap::new();
        for entry in &corpus {
            let assignment = manager
                .assign(&entry.id, entry.embedding.clone())
                .await
                .unwrap();
            buckets
                .entry(assignment.cluster_id)
                .or_default()
                .push(entry.clone());
        }
        assert_eq!(buckets.len(), 2, "corpus should split across clusters");

        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = PartitionIngestor::with_clock(
            IngestorConfig::default(),
            blob.clone(),
            manager.clone(),
            MetricsHub::new(),
            clock,
        );
        ingestor.ingest_batch(buckets).await.unwrap();

        let engine = ColdSearchEngine::new(
            SearchConfig::default(),
            manager.clone(),
            blob,
            MetricsHub::new(),
        );
        let response = engine
            .search(
                SearchRequest::new(vec![1.0, 0.0], 2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Both partitions are scanned; the x-axis vectors rank first.
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id, "x2");
        assert_eq!(response.results[1].id, "x1");
        assert!(response.metadata.missing_partitions.is_empty());
        assert_eq!(response.metadata.total_vectors_scanned, 4);
    }
}
