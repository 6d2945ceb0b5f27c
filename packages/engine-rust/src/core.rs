//! The `Core` handle: one explicitly-constructed object owning every
//! subsystem.
//!
//! There is no process-wide state anywhere in the engine; tests construct a
//! fresh `Core` per case. The handle wires the event store, cluster
//! manager, tier index, migration engine, ingestor, and search engine
//! together and exposes the write path (`insert`/`delete`/`touch`), the
//! read path (`search`), and migration driving.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use terrace_core::{Clock, IdGenerator, SystemClock, UuidIdGenerator, VectorEntry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::cluster::{ClusterAssignment, ClusterConfig, ClusterError, ClusterManager, ClusterIndex};
use crate::events::{
    EventSink, EventStore, EventStoreError, InMemoryEventStorage, JsonEventSerializer,
};
use crate::metrics::MetricsHub;
use crate::search::{
    ColdSearchEngine, IngestorConfig, PartitionIngestor, SearchConfig, SearchError, SearchRequest,
    SearchResponse,
};
use crate::tier::{
    EntrySource, InMemoryTierIndex, MigrationEngine, MigrationEngineConfig, MigrationError,
    MigrationRunReport, NewTierEntry, Tier, TierIndex, TierIndexError,
};

/// Stream that delete-driven blob reclaim intents append to.
const RECLAIM_STREAM: &str = "blob-reclaim";

/// Error kinds surfaced by the core handle.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Tier(#[from] TierIndexError),

    #[error(transparent)]
    Events(#[from] EventStoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Top-level configuration for one core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub cluster: ClusterConfig,
    pub search: SearchConfig,
    pub migration: MigrationEngineConfig,
}

impl CoreConfig {
    /// Defaults for a deployment with `num_clusters` clusters over
    /// `dimension`-sized embeddings.
    #[must_use]
    pub fn new(num_clusters: usize, dimension: usize) -> Self {
        Self {
            cluster: ClusterConfig::new(num_clusters, dimension),
            search: SearchConfig::default(),
            migration: MigrationEngineConfig::default(),
        }
    }
}

/// The in-process hot tier: live entries by id.
#[derive(Debug, Default)]
pub struct HotStore {
    entries: DashMap<String, VectorEntry>,
}

impl HotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the hot tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetches a live entry.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<VectorEntry> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    fn insert(&self, entry: VectorEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    fn remove(&self, id: &str) -> Option<VectorEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }
}

#[async_trait]
impl EntrySource for HotStore {
    async fn fetch_entries(&self, ids: &[String]) -> Result<Vec<VectorEntry>, MigrationError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| entry.clone()))
            .collect())
    }
}

/// See the module docs.
pub struct Core {
    events: Arc<EventStore>,
    clusters: Arc<ClusterManager>,
    tier_index: Arc<dyn TierIndex>,
    hot: Arc<HotStore>,
    search: ColdSearchEngine,
    migration: Arc<MigrationEngine>,
    hub: MetricsHub,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("hot_entries", &self.hot.len())
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Builds a core over the given blob store with the system clock and
    /// UUID id generation.
    #[must_use]
    pub fn new(config: CoreConfig, blob: Arc<dyn BlobStore>) -> Self {
        Self::with_parts(config, blob, Arc::new(SystemClock), Arc::new(UuidIdGenerator))
    }

    /// Builds a core with every seam injected.
    #[must_use]
    pub fn with_parts(
        config: CoreConfig,
        blob: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let hub = MetricsHub::with_prefix("terrace");

        let events = Arc::new(EventStore::with_parts(
            Arc::new(InMemoryEventStorage::new()),
            Arc::new(JsonEventSerializer),
            clock.clone(),
            ids.clone(),
        ));
        let clusters = Arc::new(ClusterManager::with_parts(
            config.cluster.clone(),
            Some(events.clone() as Arc<dyn EventSink>),
            clock.clone(),
        ));
        let tier_index: Arc<dyn TierIndex> = Arc::new(InMemoryTierIndex::with_clock(clock.clone()));
        let hot = Arc::new(HotStore::new());

        let ingestor = Arc::new(PartitionIngestor::with_clock(
            IngestorConfig {
                partition_key_prefix: config.cluster.partition_key_prefix.clone(),
                ..IngestorConfig::default()
            },
            blob.clone(),
            clusters.clone(),
            hub.clone(),
            clock.clone(),
        ));
        let search = ColdSearchEngine::new(
            config.search.clone(),
            clusters.clone(),
            blob.clone(),
            hub.clone(),
        );
        let migration = Arc::new(MigrationEngine::with_parts(
            config.migration.clone(),
            tier_index.clone(),
            hot.clone(),
            ingestor,
            blob,
            Some(events.clone() as Arc<dyn EventSink>),
            hub.clone(),
            clock,
            ids,
        ));

        Self {
            events,
            clusters,
            tier_index,
            hot,
            search,
            migration,
            hub,
        }
    }

    // -- accessors --

    /// The event store.
    #[must_use]
    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// The cluster manager.
    #[must_use]
    pub fn clusters(&self) -> &Arc<ClusterManager> {
        &self.clusters
    }

    /// The tier index.
    #[must_use]
    pub fn tier_index(&self) -> &Arc<dyn TierIndex> {
        &self.tier_index
    }

    /// The hot-tier store.
    #[must_use]
    pub fn hot(&self) -> &Arc<HotStore> {
        &self.hot
    }

    /// The migration engine, e.g. for `tier::spawn_daemon`.
    #[must_use]
    pub fn migration(&self) -> &Arc<MigrationEngine> {
        &self.migration
    }

    /// The metrics hub shared by every subsystem.
    #[must_use]
    pub fn metrics(&self) -> &MetricsHub {
        &self.hub
    }

    // -- lifecycle --

    /// Bootstraps the cluster set from seed vectors.
    ///
    /// # Errors
    ///
    /// See [`ClusterManager::initialise_centroids`].
    pub async fn bootstrap(&self, seed_vectors: &[Vec<f32>]) -> Result<(), CoreError> {
        self.clusters.initialise_centroids(seed_vectors).await?;
        Ok(())
    }

    /// Write path: assigns the entry to its nearest cluster, records the
    /// assignment event, stores the live copy hot, and indexes it.
    ///
    /// # Errors
    ///
    /// Cluster validation/busy failures, or a duplicate tier row.
    pub async fn insert(&self, entry: VectorEntry) -> Result<ClusterAssignment, CoreError> {
        let assignment = self
            .clusters
            .assign(&entry.id, entry.embedding.clone())
            .await?;

        let size_bytes = approximate_entry_size(&entry);
        self.tier_index
            .record(NewTierEntry {
                id: entry.id.clone(),
                source_table: entry.source_table,
                tier: Tier::Hot,
                location: None,
                size_bytes,
            })
            .await?;

        self.hot.insert(entry);
        self.hub.counter("core.inserts", 1, &[]);
        Ok(assignment)
    }

    /// Explicit delete: removes the assignment, the live copy, and the
    /// tier row, and enqueues a blob-reclaim intent for non-hot rows.
    ///
    /// Cold partition bytes are reclaimed later by blob GC; until then a
    /// search may still surface the deleted id from its partition.
    ///
    /// # Errors
    ///
    /// Cluster busy state or tier index failures.
    pub async fn delete(&self, id: &str) -> Result<bool, CoreError> {
        self.clusters.unassign(id).await?;
        self.hot.remove(id);

        let Some(row) = self.tier_index.remove(id).await? else {
            return Ok(false);
        };
        if let Some(location) = row.location {
            let payload = serde_json::json!({"id": id, "location": location});
            self.events
                .emit(RECLAIM_STREAM, "reclaim_requested", payload)
                .await?;
        }
        self.hub.counter("core.deletes", 1, &[]);
        Ok(true)
    }

    /// Marks an item accessed (read-path bookkeeping).
    ///
    /// # Errors
    ///
    /// [`TierIndexError::NotFound`] for unknown ids.
    pub async fn touch(&self, id: &str) -> Result<(), CoreError> {
        self.tier_index.touch(id).await?;
        Ok(())
    }

    /// Read path: cluster-routed cold search, optionally merged with
    /// caller-supplied hot results.
    ///
    /// # Errors
    ///
    /// See [`ColdSearchEngine::search`].
    pub async fn search(
        &self,
        request: SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, CoreError> {
        Ok(self.search.search(request, cancel).await?)
    }

    /// Drives one migration pass, then drops hot copies of rows that
    /// moved out of the hot tier.
    ///
    /// # Errors
    ///
    /// See [`MigrationEngine::run_once`].
    pub async fn run_migration_once(&self) -> Result<MigrationRunReport, CoreError> {
        let report = self.migration.run_once().await?;

        if report.hot_to_warm.is_some() {
            let ids: Vec<String> = self
                .hot
                .entries
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            for id in ids {
                let still_hot = matches!(
                    self.tier_index.get(&id).await?,
                    Some(row) if row.tier == Tier::Hot
                );
                if !still_hot {
                    self.hot.remove(&id);
                }
            }
        }
        Ok(report)
    }

    /// Offline re-clustering over an explicit corpus; see
    /// [`ClusterManager::recluster`].
    ///
    /// # Errors
    ///
    /// See [`ClusterManager::recluster`].
    pub async fn recluster(
        &self,
        all_vectors: &[(String, Vec<f32>)],
    ) -> Result<crate::cluster::ReclusterOutcome, CoreError> {
        Ok(self.clusters.recluster(all_vectors).await?)
    }

    /// The current routing snapshot.
    #[must_use]
    pub fn cluster_snapshot(&self) -> ClusterIndex {
        self.clusters.snapshot()
    }
}

fn approximate_entry_size(entry: &VectorEntry) -> u64 {
    let text = entry
        .metadata
        .text_content
        .as_ref()
        .map_or(0, String::len);
    (entry.id.len() + entry.embedding.len() * 4 + text) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use terrace_core::{EntryMetadata, ManualClock, SequentialIdGenerator, SourceTable};

    use crate::blob::MemoryBlobStore;
    use crate::events::ReadStreamOptions;
    use crate::tier::{BatchSizePolicy, HotToWarmPolicy, MigrationPolicyConfig, WarmToColdPolicy};

    use super::*;

    fn fast_migration_policy() -> MigrationPolicyConfig {
        MigrationPolicyConfig {
            hot_to_warm: HotToWarmPolicy {
                max_age_ms: 1_000,
                min_access_count: 1,
                max_hot_size_percent: 0.9,
                access_window_ms: Some(1_000),
            },
            warm_to_cold: WarmToColdPolicy {
                max_age_ms: 1_000,
                min_partition_size_bytes: 1,
                retention_period_ms: None,
            },
            batch: BatchSizePolicy {
                min: 1,
                max: 100,
                target_bytes: 1 << 20,
            },
        }
    }

    fn make_core(num_clusters: usize, dimension: usize) -> (Arc<ManualClock>, Core) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = CoreConfig {
            migration: MigrationEngineConfig {
                policy: fast_migration_policy(),
                retry_delay: Duration::from_millis(1),
                ..MigrationEngineConfig::default()
            },
            ..CoreConfig::new(num_clusters, dimension)
        };
        let core = Core::with_parts(
            config,
            Arc::new(MemoryBlobStore::new()),
            clock.clone(),
            Arc::new(SequentialIdGenerator::new("id")),
        );
        (clock, core)
    }

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
    async fn insert_wires_assignment_tier_and_hot_copy() {
        let (_clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();

        let assignment = core.insert(make_entry("A", vec![1.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(assignment.cluster_id, "c0");

        let row = core.tier_index().get("A").await.unwrap().unwrap();
        assert_eq!(row.tier, Tier::Hot);
        assert!(row.location.is_none());
        assert!(core.hot().get("A").is_some());

        // The assignment event landed in the cluster's stream.
        let events = core
            .events()
            .read_stream("cluster-c0", &ReadStreamOptions::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "vector_assigned");
    }

    #[tokio::test]
    async fn search_before_any_migration_reports_missing_partition() {
        let (_clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();

        let response = core
            .search(
                SearchRequest::new(vec![1.0, 0.0, 0.0], 10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.results.is_empty());
        assert_eq!(response.metadata.clusters_searched, vec!["c0"]);
        assert_eq!(response.metadata.total_vectors_scanned, 0);
        assert_eq!(
            response.metadata.missing_partitions,
            vec!["clusters/c0.parquet"]
        );
    }

    #[tokio::test]
    async fn full_lifecycle_insert_migrate_search() {
        let (clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();

        core.insert(make_entry("A", vec![1.0, 0.0, 0.0])).await.unwrap();
        core.insert(make_entry("B", vec![0.0, 1.0, 0.0])).await.unwrap();
        core.insert(make_entry("C", vec![0.0, 0.0, 1.0])).await.unwrap();

        // Two passes walk entries hot -> warm -> cold.
        clock.advance(5_000);
        core.run_migration_once().await.unwrap();
        clock.advance(5_000);
        let report = core.run_migration_once().await.unwrap();
        assert!(report.warm_to_cold.is_some());

        for id in ["A", "B", "C"] {
            let row = core.tier_index().get(id).await.unwrap().unwrap();
            assert_eq!(row.tier, Tier::Cold);
            assert_eq!(row.location.as_deref(), Some("clusters/c0.parquet"));
        }
        // Hot copies were pruned after leaving the hot tier.
        assert!(core.hot().is_empty());

        // Nearest-neighbour over the cold partition: exact hit first,
        // orthogonal tie broken by id.
        let response = core
            .search(
                SearchRequest::new(vec![1.0, 0.0, 0.0], 2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id, "A");
        assert!((response.results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(response.results[1].id, "B");
        assert!(response.results[1].similarity.abs() < 1e-6);
        assert!(response.metadata.missing_partitions.is_empty());
        assert_eq!(response.metadata.total_vectors_scanned, 3);
    }

    #[tokio::test]
    async fn delete_removes_row_and_requests_reclaim() {
        let (clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();
        core.insert(make_entry("A", vec![1.0, 0.0, 0.0])).await.unwrap();

        // Hot delete: no blob to reclaim.
        assert!(core.delete("A").await.unwrap());
        assert!(core.tier_index().get("A").await.unwrap().is_none());
        assert!(!core.events().stream_exists(RECLAIM_STREAM).await.unwrap());

        // Cold delete: reclaim intent recorded.
        core.insert(make_entry("B", vec![1.0, 0.0, 0.0])).await.unwrap();
        clock.advance(5_000);
        core.run_migration_once().await.unwrap();
        clock.advance(5_000);
        core.run_migration_once().await.unwrap();

        assert!(core.delete("B").await.unwrap());
        let events = core
            .events()
            .read_stream(RECLAIM_STREAM, &ReadStreamOptions::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["id"], "B");
        assert_eq!(events[0].payload["location"], "clusters/c0.parquet");
    }

    #[tokio::test]
    async fn delete_of_unknown_id_is_false() {
        let (_clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();
        assert!(!core.delete("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn touched_entries_stay_hot() {
        let (clock, core) = make_core(1, 3);
        core.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();
        core.insert(make_entry("busy", vec![1.0, 0.0, 0.0])).await.unwrap();

        clock.advance(500);
        core.touch("busy").await.unwrap();
        core.touch("busy").await.unwrap();
        core.run_migration_once().await.unwrap();

        let row = core.tier_index().get("busy").await.unwrap().unwrap();
        assert_eq!(row.tier, Tier::Hot);
        assert!(core.hot().get("busy").is_some());
    }

    #[tokio::test]
    async fn fresh_cores_share_no_state() {
        let (_c1, first) = make_core(1, 3);
        let (_c2, second) = make_core(1, 3);
        first.bootstrap(&[vec![1.0, 0.0, 0.0]]).await.unwrap();
        first.insert(make_entry("A", vec![1.0, 0.0, 0.0])).await.unwrap();

        assert_eq!(first.hot().len(), 1);
        assert_eq!(second.hot().len(), 0);
        assert_eq!(second.cluster_snapshot().cluster_count, 0);
    }
}
