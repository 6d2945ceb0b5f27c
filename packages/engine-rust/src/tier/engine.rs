//! The migration engine: scans the tier index, applies policy, and executes
//! warm-ward and cold-ward batches.
//!
//! The write path is strict: partition/batch blobs are written first, then
//! the tier index moves in one atomic batch; any failure aborts the batch
//! and leaves the index unchanged (an already-written blob is an orphan for
//! blob GC). Execution retries go through an [`ErrorBoundary`]; the search
//! read path never retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use terrace_core::{Clock, IdGenerator, SystemClock, UuidIdGenerator, VectorEntry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobError, BlobStore};
use crate::codec::{self, CodecError, ReadOptions, WriteOptions};
use crate::events::EventSink;
use crate::metrics::{ErrorBoundary, ErrorBoundaryConfig, MetricsHub};

use super::index::{EligibilityQuery, TierIndex, TierUpdate};
use super::policy::{
    evaluate, select_batch, BatchSelection, MigrationCandidate, MigrationPolicyConfig,
    TierUsageView,
};
use super::{Tier, TierIndexError};

/// Stream that migration lifecycle events append to.
const MIGRATION_STREAM: &str = "tier-migrations";

/// Error kinds on the migration path.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Tier(#[from] TierIndexError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The hot-entry provider failed.
    #[error("entry source failure: {0}")]
    Source(String),

    /// The cold partition sink failed.
    #[error("partition ingest failure: {0}")]
    Ingest(String),
}

/// Supplies live entry payloads for hot rows selected for migration.
///
/// Implemented by the hot-tier store; warm payloads are read back from
/// their batch blobs by the engine itself.
#[async_trait]
pub trait EntrySource: Send + Sync {
    /// Fetches entries by id, in any order. Missing ids are omitted.
    async fn fetch_entries(&self, ids: &[String]) -> Result<Vec<VectorEntry>, MigrationError>;
}

/// Writes entries into cluster-partitioned cold storage.
///
/// Implemented by the cold search engine's ingest side; returns the
/// partition key each id landed in.
#[async_trait]
pub trait PartitionSink: Send + Sync {
    /// Groups `entries` by assigned cluster and rewrites the partitions.
    async fn write_partitions(
        &self,
        entries: Vec<VectorEntry>,
    ) -> Result<Vec<(String, String)>, MigrationError>;
}

/// Engine configuration beyond the policy itself.
#[derive(Debug, Clone)]
pub struct MigrationEngineConfig {
    pub policy: MigrationPolicyConfig,
    /// Hot tier capacity in bytes; drives the pressure rule.
    pub hot_capacity_bytes: u64,
    /// Rows pulled from the tier index per scan.
    pub scan_limit: usize,
    /// Key prefix for warm batch blobs.
    pub warm_key_prefix: String,
    /// Retries for batch execution.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for MigrationEngineConfig {
    fn default() -> Self {
        Self {
            policy: MigrationPolicyConfig::default(),
            hot_capacity_bytes: 1 << 30,
            scan_limit: 2_000,
            warm_key_prefix: "warm".to_string(),
            max_retries: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// One executed (or skipped) batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub migrated: usize,
    pub total_bytes: u64,
    pub reason: String,
    pub started_at: i64,
    pub completed_at: i64,
}

/// Result of one engine pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunReport {
    /// Candidates evaluated across both directions.
    pub evaluated: u64,
    pub hot_to_warm: Option<BatchOutcome>,
    pub warm_to_cold: Option<BatchOutcome>,
}

/// Running counters across engine passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationStatistics {
    pub total_migrations_evaluated: u64,
    pub total_bytes_migrated: u64,
    pub last_migration_at: Option<i64>,
    pub average_migration_time_ms: f64,
}

#[derive(Debug, Default)]
struct RunningStats {
    evaluated: u64,
    bytes_migrated: u64,
    last_migration_at: Option<i64>,
    total_time_ms: f64,
    executed_batches: u64,
}

/// See the module docs.
pub struct MigrationEngine {
    config: MigrationEngineConfig,
    tier_index: Arc<dyn TierIndex>,
    hot_source: Arc<dyn EntrySource>,
    partition_sink: Arc<dyn PartitionSink>,
    blob: Arc<dyn BlobStore>,
    events: Option<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    hub: MetricsHub,
    boundary: ErrorBoundary,
    stats: Mutex<RunningStats>,
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("scan_limit", &self.config.scan_limit)
            .finish_non_exhaustive()
    }
}

impl MigrationEngine {
    /// Creates an engine with the system clock and UUID batch ids.
    #[must_use]
    pub fn new(
        config: MigrationEngineConfig,
        tier_index: Arc<dyn TierIndex>,
        hot_source: Arc<dyn EntrySource>,
        partition_sink: Arc<dyn PartitionSink>,
        blob: Arc<dyn BlobStore>,
        events: Option<Arc<dyn EventSink>>,
        hub: MetricsHub,
    ) -> Self {
        Self::with_parts(
            config,
            tier_index,
            hot_source,
            partition_sink,
            blob,
            events,
            hub,
            Arc::new(SystemClock),
            Arc::new(UuidIdGenerator),
        )
    }

    /// Creates an engine with every seam injected.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        config: MigrationEngineConfig,
        tier_index: Arc<dyn TierIndex>,
        hot_source: Arc<dyn EntrySource>,
        partition_sink: Arc<dyn PartitionSink>,
        blob: Arc<dyn BlobStore>,
        events: Option<Arc<dyn EventSink>>,
        hub: MetricsHub,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let boundary = ErrorBoundary::with_clock(
            ErrorBoundaryConfig::named("migration")
                .with_retries(config.max_retries, config.retry_delay),
            hub.clone(),
            clock.clone(),
        );
        Self {
            config,
            tier_index,
            hot_source,
            partition_sink,
            blob,
            events,
            clock,
            ids,
            hub,
            boundary,
            stats: Mutex::new(RunningStats::default()),
        }
    }

    /// The engine's error boundary, for error-state inspection.
    #[must_use]
    pub fn boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }

    /// Current running counters.
    #[must_use]
    pub fn statistics(&self) -> MigrationStatistics {
        let stats = self.stats.lock();
        let average = if stats.executed_batches == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let batches = stats.executed_batches as f64;
            stats.total_time_ms / batches
        };
        MigrationStatistics {
            total_migrations_evaluated: stats.evaluated,
            total_bytes_migrated: stats.bytes_migrated,
            last_migration_at: stats.last_migration_at,
            average_migration_time_ms: average,
        }
    }

    /// One full engine pass: hot-ward scan then warm-ward scan.
    ///
    /// # Errors
    ///
    /// Propagates scan and execution failures after the retry budget; an
    /// aborted batch leaves the tier index unchanged.
    pub async fn run_once(&self) -> Result<MigrationRunReport, MigrationError> {
        let timer = self.hub.timer("migration.run_ms", &[]);
        let result = self.run_inner().await;
        match &result {
            Ok(report) => {
                timer.stop();
                tracing::debug!(
                    evaluated = report.evaluated,
                    hot_to_warm = report.hot_to_warm.as_ref().map_or(0, |b| b.migrated),
                    warm_to_cold = report.warm_to_cold.as_ref().map_or(0, |b| b.migrated),
                    "migration pass complete"
                );
            }
            Err(err) => {
                timer.cancel();
                tracing::warn!(error = %err, "migration pass failed");
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<MigrationRunReport, MigrationError> {
        let mut report = MigrationRunReport::default();

        let tier_stats = self.tier_index.statistics().await?;
        let hot_usage = TierUsageView {
            percent_full: fill_fraction(tier_stats.hot.bytes, self.config.hot_capacity_bytes),
        };

        let hot_candidates = self.collect(Tier::Hot, &hot_usage, &mut report.evaluated).await?;
        let hot_selection = select_batch(hot_candidates, &self.config.policy.batch);
        if hot_selection.should_proceed {
            report.hot_to_warm = Some(self.execute_hot_to_warm(&hot_selection).await?);
        } else {
            tracing::debug!(reason = %hot_selection.reason, "hot-to-warm batch deferred");
        }

        let quiet = TierUsageView::default();
        let warm_candidates = self.collect(Tier::Warm, &quiet, &mut report.evaluated).await?;
        let warm_selection = select_batch(warm_candidates, &self.config.policy.batch);
        if warm_selection.should_proceed {
            if warm_selection.total_bytes
                < self.config.policy.warm_to_cold.min_partition_size_bytes
            {
                tracing::debug!(
                    bytes = warm_selection.total_bytes,
                    "warm-to-cold batch below minimum partition size, deferred"
                );
            } else {
                report.warm_to_cold = Some(self.execute_warm_to_cold(&warm_selection).await?);
            }
        } else {
            tracing::debug!(reason = %warm_selection.reason, "warm-to-cold batch deferred");
        }

        self.stats.lock().evaluated += report.evaluated;
        Ok(report)
    }

    async fn collect(
        &self,
        tier: Tier,
        hot_usage: &TierUsageView,
        evaluated: &mut u64,
    ) -> Result<Vec<MigrationCandidate>, MigrationError> {
        let now = self.clock.now_millis();
        let window = self
            .config
            .policy
            .hot_to_warm
            .access_window_ms
            .unwrap_or(self.config.policy.hot_to_warm.max_age_ms);

        let rows = self
            .tier_index
            .eligible(&EligibilityQuery {
                limit: Some(self.config.scan_limit),
                ..EligibilityQuery::for_tier(tier)
            })
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let access = self.tier_index.access_stats(&row.id, window).await?;
            let decision = evaluate(&self.config.policy, &row, &access, hot_usage, now);
            *evaluated += 1;
            candidates.push(MigrationCandidate {
                entry: row,
                decision,
            });
        }
        Ok(candidates)
    }

    async fn execute_hot_to_warm(
        &self,
        selection: &BatchSelection,
    ) -> Result<BatchOutcome, MigrationError> {
        let started_at = self.clock.now_millis();
        let ids: Vec<String> = selection
            .items
            .iter()
            .map(|candidate| candidate.entry.id.clone())
            .collect();

        self.emit_lifecycle("migration_started", Tier::Warm, selection).await;

        let entries = self.hot_source.fetch_entries(&ids).await?;
        let encoded = codec::serialize(&entries, &WriteOptions::default())?;
        let batch_key = format!(
            "{}/batch-{}.parquet",
            self.config.warm_key_prefix,
            self.ids.next_id()
        );

        let updates: Vec<TierUpdate> = ids
            .iter()
            .map(|id| TierUpdate {
                id: id.clone(),
                tier: Tier::Warm,
                location: Some(batch_key.clone()),
            })
            .collect();

        let blob = self.blob.clone();
        let tier_index = self.tier_index.clone();
        let buffer = encoded.buffer.clone();
        let key = batch_key.clone();
        self.boundary
            .run(move || {
                let blob = blob.clone();
                let tier_index = tier_index.clone();
                let buffer = buffer.clone();
                let key = key.clone();
                let updates = updates.clone();
                async move {
                    blob.put(&key, buffer).await.map_err(MigrationError::Blob)?;
                    tier_index
                        .migrate(&updates, true)
                        .await
                        .map_err(MigrationError::Tier)?;
                    Ok::<(), MigrationError>(())
                }
            })
            .await?;

        let completed_at = self.clock.now_millis();
        let outcome = BatchOutcome {
            migrated: ids.len(),
            total_bytes: selection.total_bytes,
            reason: selection.reason.clone(),
            started_at,
            completed_at,
        };
        self.finish_batch(&outcome, Tier::Warm, selection).await;
        Ok(outcome)
    }

    async fn execute_warm_to_cold(
        &self,
        selection: &BatchSelection,
    ) -> Result<BatchOutcome, MigrationError> {
        let started_at = self.clock.now_millis();
        self.emit_lifecycle("migration_started", Tier::Cold, selection).await;

        let entries = self.fetch_warm_entries(selection).await?;
        let placements = self.partition_sink.write_partitions(entries).await?;

        let updates: Vec<TierUpdate> = placements
            .into_iter()
            .map(|(id, partition_key)| TierUpdate {
                id,
                tier: Tier::Cold,
                location: Some(partition_key),
            })
            .collect();
        let migrated = updates.len();

        let tier_index = self.tier_index.clone();
        self.boundary
            .run(move || {
                let tier_index = tier_index.clone();
                let updates = updates.clone();
                async move {
                    tier_index
                        .migrate(&updates, true)
                        .await
                        .map_err(MigrationError::Tier)?;
                    Ok::<(), MigrationError>(())
                }
            })
            .await?;

        let completed_at = self.clock.now_millis();
        let outcome = BatchOutcome {
            migrated,
            total_bytes: selection.total_bytes,
            reason: selection.reason.clone(),
            started_at,
            completed_at,
        };
        self.finish_batch(&outcome, Tier::Cold, selection).await;
        Ok(outcome)
    }

    /// Reads selected warm entries back from their batch blobs.
    async fn fetch_warm_entries(
        &self,
        selection: &BatchSelection,
    ) -> Result<Vec<VectorEntry>, MigrationError> {
        let mut by_location: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for candidate in &selection.items {
            let Some(location) = candidate.entry.location.as_deref() else {
                return Err(MigrationError::Tier(TierIndexError::Invariant(format!(
                    "warm entry '{}' has no location",
                    candidate.entry.id
                ))));
            };
            by_location
                .entry(location.to_string())
                .or_default()
                .push(candidate.entry.id.as_str());
        }

        let mut entries = Vec::new();
        for (location, ids) in by_location {
            let Some(buffer) = self.blob.get(&location).await? else {
                return Err(MigrationError::Ingest(format!(
                    "warm batch blob '{location}' is missing"
                )));
            };
            let batch: Vec<VectorEntry> = codec::deserialize(&buffer, &ReadOptions::default())?;
            entries.extend(
                batch
                    .into_iter()
                    .filter(|entry| ids.contains(&entry.id.as_str())),
            );
        }
        Ok(entries)
    }

    /// Deletes cold rows past the retention horizon, emitting blob-reclaim
    /// intents. No-op without a configured retention period.
    ///
    /// # Errors
    ///
    /// Propagates tier index failures.
    pub async fn purge_expired(&self) -> Result<usize, MigrationError> {
        let Some(retention) = self.config.policy.warm_to_cold.retention_period_ms else {
            return Ok(0);
        };
        let now = self.clock.now_millis();

        let rows = self
            .tier_index
            .eligible(&EligibilityQuery::for_tier(Tier::Cold))
            .await?;
        let mut purged = 0;
        for row in rows {
            if row.tier_age_ms(now) <= retention {
                continue;
            }
            self.tier_index.remove(&row.id).await?;
            purged += 1;
            if let Some(events) = &self.events {
                let payload = serde_json::json!({
                    "id": row.id,
                    "location": row.location,
                    "reason": "retention period expired",
                });
                if let Err(err) = events
                    .emit(MIGRATION_STREAM, "retention_expired", payload)
                    .await
                {
                    tracing::warn!(error = %err, "retention event emit failed");
                }
            }
        }
        Ok(purged)
    }

    async fn emit_lifecycle(&self, event_type: &str, target: Tier, selection: &BatchSelection) {
        if let Some(events) = &self.events {
            let payload = serde_json::json!({
                "targetTier": target.as_str(),
                "items": selection.items.len(),
                "totalBytes": selection.total_bytes,
                "reason": selection.reason,
            });
            if let Err(err) = events.emit(MIGRATION_STREAM, event_type, payload).await {
                tracing::warn!(error = %err, event_type, "migration event emit failed");
            }
        }
    }

    async fn finish_batch(&self, outcome: &BatchOutcome, target: Tier, selection: &BatchSelection) {
        self.emit_lifecycle("migration_completed", target, selection).await;
        self.hub.counter(
            "migration.items",
            outcome.migrated as u64,
            &[("target".to_string(), target.as_str().to_string())],
        );
        self.hub.counter(
            "migration.bytes",
            outcome.total_bytes,
            &[("target".to_string(), target.as_str().to_string())],
        );

        let mut stats = self.stats.lock();
        stats.bytes_migrated += outcome.total_bytes;
        stats.last_migration_at = Some(outcome.completed_at);
        #[allow(clippy::cast_precision_loss)]
        let elapsed = (outcome.completed_at - outcome.started_at).max(0) as f64;
        stats.total_time_ms += elapsed;
        stats.executed_batches += 1;
    }
}

fn fill_fraction(bytes: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let fraction = bytes as f64 / capacity as f64;
    fraction
}

/// Spawns the interval-driven migration loop; cancel the token to stop it.
pub fn spawn_daemon(
    engine: Arc<MigrationEngine>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = engine.run_once().await {
                        tracing::warn!(error = %err, "scheduled migration pass failed");
                    }
                }
            }
        }
        tracing::debug!("migration daemon stopped");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
