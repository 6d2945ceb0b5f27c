//! Ingest side: building and rewriting cluster partitions.
//!
//! Parquet files are immutable, so adding entries to a cluster is a full
//! read-modify-rewrite of its partition. Concurrent ingest into the same
//! cluster is serialised by a per-cluster async lock; the tier-index update
//! that follows a write belongs to the migration engine (atomic batch), so
//! a failure there orphans the partition for blob GC rather than corrupting
//! the index.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use terrace_core::{Clock, SystemClock, VectorEntry};
use tokio::sync::Mutex;

use crate::blob::BlobStore;
use crate::cluster::ClusterManager;
use crate::codec::{self, partition_key_values, CodecError, ReadOptions, WriteOptions};
use crate::metrics::MetricsHub;
use crate::tier::{MigrationError, PartitionSink};

/// Resolves a vector id to its assigned cluster.
///
/// The ingest path never computes assignments itself; they were fixed at
/// write time by the cluster manager.
pub trait AssignmentLookup: Send + Sync {
    /// The cluster the vector currently belongs to, if any.
    fn cluster_of(&self, vector_id: &str) -> Option<String>;
}

impl AssignmentLookup for ClusterManager {
    fn cluster_of(&self, vector_id: &str) -> Option<String> {
        self.assignment(vector_id).map(|a| a.cluster_id)
    }
}

/// Ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Prefix for partition blob keys.
    pub partition_key_prefix: String,
    /// Encoding options for partition writes; the partition key-values are
    /// stamped on top per cluster.
    pub write_options: WriteOptions,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            partition_key_prefix: "clusters".to_string(),
            write_options: WriteOptions::default(),
        }
    }
}

/// Builds cold partitions from cluster-bucketed entries.
pub struct PartitionIngestor {
    config: IngestorConfig,
    blob: Arc<dyn BlobStore>,
    lookup: Arc<dyn AssignmentLookup>,
    clock: Arc<dyn Clock>,
    hub: MetricsHub,
    cluster_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for PartitionIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionIngestor")
            .field("prefix", &self.config.partition_key_prefix)
            .finish_non_exhaustive()
    }
}

impl PartitionIngestor {
    /// Creates an ingestor on the system clock.
    #[must_use]
    pub fn new(
        config: IngestorConfig,
        blob: Arc<dyn BlobStore>,
        lookup: Arc<dyn AssignmentLookup>,
        hub: MetricsHub,
    ) -> Self {
        Self::with_clock(config, blob, lookup, hub, Arc::new(SystemClock))
    }

    /// Creates an ingestor with an injected clock.
    #[must_use]
    pub fn with_clock(
        config: IngestorConfig,
        blob: Arc<dyn BlobStore>,
        lookup: Arc<dyn AssignmentLookup>,
        hub: MetricsHub,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            blob,
            lookup,
            clock,
            hub,
            cluster_locks: DashMap::new(),
        }
    }

    /// Blob key of a cluster's partition.
    #[must_use]
    pub fn partition_key(&self, cluster_id: &str) -> String {
        format!("{}/{cluster_id}.parquet", self.config.partition_key_prefix)
    }

    fn cluster_lock(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        self.cluster_locks
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Writes cluster-bucketed entries into their partitions.
    ///
    /// Existing partitions are fully rewritten with the new entries
    /// appended; an entry re-ingested under an existing id replaces the
    /// stored row. Returns `(id, partition_key)` placements for the
    /// tier-index update. Strict: the first failure aborts the batch.
    ///
    /// # Errors
    ///
    /// Blob and codec failures, including an undecodable existing
    /// partition (rewriting over it would lose data).
    pub async fn ingest_batch(
        &self,
        buckets: BTreeMap<String, Vec<VectorEntry>>,
    ) -> Result<Vec<(String, String)>, MigrationError> {
        let mut placements = Vec::new();

        for (cluster_id, items) in buckets {
            if items.is_empty() {
                continue;
            }
            let lock = self.cluster_lock(&cluster_id);
            let _guard = lock.lock().await;

            let key = self.partition_key(&cluster_id);
            let existing: Vec<VectorEntry> = match self.blob.get(&key).await? {
                Some(buffer) => codec::deserialize(&buffer, &ReadOptions::default())?,
                None => Vec::new(),
            };

            // Rewrite: keep existing rows not superseded by this batch,
            // then append the new ones.
            let new_ids: std::collections::HashSet<&str> =
                items.iter().map(|entry| entry.id.as_str()).collect();
            let mut merged: Vec<VectorEntry> = existing
                .into_iter()
                .filter(|entry| !new_ids.contains(entry.id.as_str()))
                .collect();
            merged.extend(items.iter().cloned());

            let dimension = merged[0].embedding.len();
            for entry in &merged {
                if entry.embedding.len() != dimension {
                    return Err(CodecError::DimensionMismatch {
                        expected: dimension,
                        actual: entry.embedding.len(),
                    }
                    .into());
                }
            }

            let write_options = WriteOptions {
                key_value_metadata: partition_key_values(
                    &cluster_id,
                    dimension,
                    self.clock.now_millis(),
                ),
                ..self.config.write_options.clone()
            };
            let encoded = codec::serialize(&merged, &write_options)?;
            let size = encoded.buffer.len() as u64;
            self.blob.put(&key, encoded.buffer).await?;

            self.hub.counter(
                "ingest.partition_writes",
                1,
                &[("cluster".to_string(), cluster_id.clone())],
            );
            self.hub.counter("ingest.partition_bytes", size, &[]);
            tracing::debug!(
                cluster_id,
                rows = merged.len(),
                bytes = size,
                "partition rewritten"
            );

            placements.extend(items.iter().map(|entry| (entry.id.clone(), key.clone())));
        }

        Ok(placements)
    }
}

#[async_trait]
impl PartitionSink for PartitionIngestor {
    async fn write_partitions(
        &self,
        entries: Vec<VectorEntry>,
    ) -> Result<Vec<(String, String)>, MigrationError> {
        let mut buckets: BTreeMap<String, Vec<VectorEntry>> = BTreeMap::new();
        for entry in entries {
            let Some(cluster_id) = self.lookup.cluster_of(&entry.id) else {
                return Err(MigrationError::Ingest(format!(
                    "vector '{}' has no cluster assignment",
                    entry.id
                )));
            };
            buckets.entry(cluster_id).or_default().push(entry);
        }
        self.ingest_batch(buckets).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use terrace_core::{EntryMetadata, ManualClock, SourceTable};

    use crate::blob::MemoryBlobStore;
    use crate::codec::read_partition_metadata;

    use super::*;

    fn make_entry(id: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            embedding,
            source_table: SourceTable::Things,
            source_rowid: 0,
            metadata: EntryMetadata::for_namespace("ns"),
        }
    }

    /// Map-backed lookup fake.
    struct MapLookup(std::collections::HashMap<String, String>);

    impl AssignmentLookup for MapLookup {
        fn cluster_of(&self, vector_id: &str) -> Option<String> {
            self.0.get(vector_id).cloned()
        }
    }

    fn make_ingestor(
        blob: Arc<MemoryBlobStore>,
        assignments: &[(&str, &str)],
    ) -> PartitionIngestor {
        let lookup = MapLookup(
            assignments
                .iter()
                .map(|(id, cluster)| ((*id).to_string(), (*cluster).to_string()))
                .collect(),
        );
        PartitionIngestor::with_clock(
            IngestorConfig::default(),
            blob,
            Arc::new(lookup),
            MetricsHub::new(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    #[tokio::test]
    async fn ingest_creates_stamped_partition() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob.clone(), &[]);

        let mut buckets = BTreeMap::new();
        buckets.insert(
            "c0".to_string(),
            vec![make_entry("a", vec![1.0, 0.0, 0.0]), make_entry("b", vec![0.0, 1.0, 0.0])],
        );
        let placements = ingestor.ingest_batch(buckets).await.unwrap();

        assert_eq!(
            placements,
            vec![
                ("a".to_string(), "clusters/c0.parquet".to_string()),
                ("b".to_string(), "clusters/c0.parquet".to_string()),
            ]
        );

        // The partition is HEAD-readable with the ingest stamp.
        let meta = read_partition_metadata(&*blob, "clusters/c0.parquet")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.cluster_id, "c0");
        assert_eq!(meta.vector_count, 2);
        assert_eq!(meta.dimensionality, 3);
        assert_eq!(meta.created_at, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn reingest_rewrites_with_append_and_replace() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob.clone(), &[]);

        let mut first = BTreeMap::new();
        first.insert(
            "c0".to_string(),
            vec![make_entry("a", vec![1.0, 0.0]), make_entry("b", vec![0.0, 1.0])],
        );
        ingestor.ingest_batch(first).await.unwrap();

        // "b" is re-ingested with a new embedding; "c" is new.
        let mut second = BTreeMap::new();
        second.insert(
            "c0".to_string(),
            vec![make_entry("b", vec![0.5, 0.5]), make_entry("c", vec![1.0, 1.0])],
        );
        ingestor.ingest_batch(second).await.unwrap();

        let buffer = blob.get("clusters/c0.parquet").await.unwrap().unwrap();
        let rows: Vec<VectorEntry> = codec::deserialize(&buffer, &ReadOptions::default()).unwrap();

        let mut ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let b = rows.iter().find(|r| r.id == "b").unwrap();
        assert_eq!(b.embedding, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn buckets_write_independent_partitions() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob.clone(), &[]);

        let mut buckets = BTreeMap::new();
        buckets.insert("c0".to_string(), vec![make_entry("a", vec![1.0, 0.0])]);
        buckets.insert("c1".to_string(), vec![make_entry("b", vec![0.0, 1.0])]);
        ingestor.ingest_batch(buckets).await.unwrap();

        let keys = blob.list("clusters/").await.unwrap();
        assert_eq!(keys, vec!["clusters/c0.parquet", "clusters/c1.parquet"]);
    }

    #[tokio::test]
    async fn ragged_dimensions_abort_the_batch() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob.clone(), &[]);

        let mut buckets = BTreeMap::new();
        buckets.insert(
            "c0".to_string(),
            vec![make_entry("a", vec![1.0, 0.0]), make_entry("bad", vec![1.0])],
        );
        let err = ingestor.ingest_batch(buckets).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Codec(CodecError::DimensionMismatch { .. })
        ));
        assert!(blob.get("clusters/c0.parquet").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sink_groups_entries_by_assignment() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob.clone(), &[("a", "c0"), ("b", "c1"), ("c", "c0")]);

        let placements = ingestor
            .write_partitions(vec![
                make_entry("a", vec![1.0, 0.0]),
                make_entry("b", vec![0.0, 1.0]),
                make_entry("c", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let mut placements = placements;
        placements.sort();
        assert_eq!(
            placements,
            vec![
                ("a".to_string(), "clusters/c0.parquet".to_string()),
                ("b".to_string(), "clusters/c1.parquet".to_string()),
                ("c".to_string(), "clusters/c0.parquet".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unassigned_entry_fails_the_sink() {
        let blob = Arc::new(MemoryBlobStore::new());
        let ingestor = make_ingestor(blob, &[("a", "c0")]);

        let err = ingestor
            .write_partitions(vec![make_entry("ghost", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Ingest(_)));
    }
}
