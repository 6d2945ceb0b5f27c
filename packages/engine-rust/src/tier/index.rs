//! The tier index: durable mapping from item id to placement and access
//! statistics.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use terrace_core::{Clock, SourceTable, SystemClock};

use super::policy::AccessStats;
use super::{Tier, TierIndexEntry, TierIndexError};

/// Accesses remembered per item for sliding-window statistics.
const ACCESS_HISTORY_CAP: usize = 512;

/// Input for [`TierIndex::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTierEntry {
    pub id: String,
    pub source_table: SourceTable,
    pub tier: Tier,
    pub location: Option<String>,
    pub size_bytes: u64,
}

impl NewTierEntry {
    /// A hot entry with no location.
    #[must_use]
    pub fn hot(id: impl Into<String>, source_table: SourceTable, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            source_table,
            tier: Tier::Hot,
            location: None,
            size_bytes,
        }
    }
}

/// Partial update for [`TierIndex::update`]. The nested `Option` on
/// `location` distinguishes "leave unchanged" from "set to null".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPatch {
    pub tier: Option<Tier>,
    pub location: Option<Option<String>>,
}

/// One row of a batch migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierUpdate {
    pub id: String,
    pub tier: Tier,
    pub location: Option<String>,
}

/// Sort key for eligibility queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    AccessedAt,
    AccessCount,
}

/// Sort direction for eligibility queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

/// Candidate filter for the migration scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityQuery {
    /// Tier to scan.
    pub from_tier: Tier,
    /// Only rows whose last access is at least this old (or never
    /// accessed).
    pub access_threshold_ms: Option<i64>,
    /// Only rows with at most this many accesses.
    pub max_access_count: Option<u64>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    pub order_by: OrderBy,
    pub order_direction: OrderDirection,
}

impl EligibilityQuery {
    /// Everything in `from_tier`, oldest first.
    #[must_use]
    pub fn for_tier(from_tier: Tier) -> Self {
        Self {
            from_tier,
            access_threshold_ms: None,
            max_access_count: None,
            limit: None,
            order_by: OrderBy::default(),
            order_direction: OrderDirection::default(),
        }
    }
}

/// Entry count and byte total for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierUsage {
    pub entries: u64,
    pub bytes: u64,
}

/// Per-tier usage plus the overall total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStatistics {
    pub hot: TierUsage,
    pub warm: TierUsage,
    pub cold: TierUsage,
}

impl TierStatistics {
    /// Usage for one tier.
    #[must_use]
    pub fn for_tier(&self, tier: Tier) -> TierUsage {
        match tier {
            Tier::Hot => self.hot,
            Tier::Warm => self.warm,
            Tier::Cold => self.cold,
        }
    }

    /// Sum across tiers.
    #[must_use]
    pub fn total(&self) -> TierUsage {
        TierUsage {
            entries: self.hot.entries + self.warm.entries + self.cold.entries,
            bytes: self.hot.bytes + self.warm.bytes + self.cold.bytes,
        }
    }
}

/// Durable placement index contract.
#[async_trait]
pub trait TierIndex: Send + Sync + 'static {
    /// Creates a row.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::Duplicate`] for an existing id,
    /// [`TierIndexError::Invariant`] for a tier/location mismatch.
    async fn record(&self, entry: NewTierEntry) -> Result<TierIndexEntry, TierIndexError>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::NotFound`], [`TierIndexError::Invariant`].
    async fn update(&self, id: &str, patch: TierPatch) -> Result<TierIndexEntry, TierIndexError>;

    /// Fetches a row, or `None` when absent.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::Storage`] on backend failure.
    async fn get(&self, id: &str) -> Result<Option<TierIndexEntry>, TierIndexError>;

    /// Atomically bumps `access_count` and stamps `accessed_at`.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::NotFound`].
    async fn touch(&self, id: &str) -> Result<(), TierIndexError>;

    /// Removes a row (explicit delete path). Absent ids return `None`.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::Storage`] on backend failure.
    async fn remove(&self, id: &str) -> Result<Option<TierIndexEntry>, TierIndexError>;

    /// Candidate rows for migration, filtered and ordered per the query.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::Storage`] on backend failure.
    async fn eligible(&self, query: &EligibilityQuery)
        -> Result<Vec<TierIndexEntry>, TierIndexError>;

    /// Batch tier/location change. With `atomic`, any failing row aborts
    /// the whole batch with no row modified; otherwise valid rows apply
    /// independently. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// With `atomic`: the first validation failure.
    async fn migrate(&self, updates: &[TierUpdate], atomic: bool)
        -> Result<usize, TierIndexError>;

    /// Per-tier entry counts and byte totals.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::Storage`] on backend failure.
    async fn statistics(&self) -> Result<TierStatistics, TierIndexError>;

    /// Sliding-window access statistics for one row.
    ///
    /// # Errors
    ///
    /// [`TierIndexError::NotFound`].
    async fn access_stats(&self, id: &str, window_ms: i64)
        -> Result<AccessStats, TierIndexError>;
}

fn check_invariant(tier: Tier, location: Option<&String>) -> Result<(), TierIndexError> {
    match (tier, location) {
        (Tier::Hot, Some(_)) => Err(TierIndexError::Invariant(
            "hot entries cannot carry a location".to_string(),
        )),
        (Tier::Warm | Tier::Cold, None) => Err(TierIndexError::Invariant(format!(
            "{} entries require a location",
            tier.as_str()
        ))),
        _ => Ok(()),
    }
}

/// In-memory [`TierIndex`] backed by [`DashMap`], with a bounded per-item
/// access history for window statistics.
pub struct InMemoryTierIndex {
    entries: DashMap<String, TierIndexEntry>,
    access_log: DashMap<String, VecDeque<i64>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryTierIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTierIndex")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryTierIndex {
    /// An empty index on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// An empty index on an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            access_log: DashMap::new(),
            clock,
        }
    }

    /// Number of indexed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryTierIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierIndex for InMemoryTierIndex {
    async fn record(&self, entry: NewTierEntry) -> Result<TierIndexEntry, TierIndexError> {
        check_invariant(entry.tier, entry.location.as_ref())?;

        let row = TierIndexEntry {
            id: entry.id.clone(),
            source_table: entry.source_table,
            tier: entry.tier,
            location: entry.location,
            size_bytes: entry.size_bytes,
            created_at: self.clock.now_millis(),
            migrated_at: None,
            accessed_at: None,
            access_count: 0,
        };

        match self.entries.entry(entry.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TierIndexError::Duplicate(entry.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn update(&self, id: &str, patch: TierPatch) -> Result<TierIndexEntry, TierIndexError> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| TierIndexError::NotFound(id.to_string()))?;

        let tier = patch.tier.unwrap_or(entry.tier);
        let location = match patch.location {
            Some(location) => location,
            None => entry.location.clone(),
        };
        check_invariant(tier, location.as_ref())?;

        entry.tier = tier;
        entry.location = location;
        Ok(entry.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<TierIndexEntry>, TierIndexError> {
        Ok(self.entries.get(id).map(|entry| entry.clone()))
    }

    async fn touch(&self, id: &str) -> Result<(), TierIndexError> {
        let now = self.clock.now_millis();
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| TierIndexError::NotFound(id.to_string()))?;
        entry.access_count += 1;
        entry.accessed_at = Some(now);

        let mut log = self.access_log.entry(id.to_string()).or_default();
        log.push_back(now);
        if log.len() > ACCESS_HISTORY_CAP {
            log.pop_front();
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<TierIndexEntry>, TierIndexError> {
        self.access_log.remove(id);
        Ok(self.entries.remove(id).map(|(_, entry)| entry))
    }

    async fn eligible(
        &self,
        query: &EligibilityQuery,
    ) -> Result<Vec<TierIndexEntry>, TierIndexError> {
        let now = self.clock.now_millis();
        let mut rows: Vec<TierIndexEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.tier == query.from_tier)
            .filter(|entry| match query.access_threshold_ms {
                Some(threshold) => entry
                    .accessed_at
                    .is_none_or(|at| now - at >= threshold),
                None => true,
            })
            .filter(|entry| match query.max_access_count {
                Some(max) => entry.access_count <= max,
                None => true,
            })
            .map(|entry| entry.clone())
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match query.order_by {
                OrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
                OrderBy::AccessedAt => a.accessed_at.cmp(&b.accessed_at),
                OrderBy::AccessCount => a.access_count.cmp(&b.access_count),
            };
            let ordering = match query.order_direction {
                OrderDirection::Ascending => ordering,
                OrderDirection::Descending => ordering.reverse(),
            };
            // Id tie-break keeps scans deterministic.
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn migrate(
        &self,
        updates: &[TierUpdate],
        atomic: bool,
    ) -> Result<usize, TierIndexError> {
        if atomic {
            // Validate the whole batch before touching any row.
            for update in updates {
                check_invariant(update.tier, update.location.as_ref())?;
                if !self.entries.contains_key(&update.id) {
                    return Err(TierIndexError::NotFound(update.id.clone()));
                }
            }
        }

        let now = self.clock.now_millis();
        let mut applied = 0;
        for update in updates {
            if !atomic && check_invariant(update.tier, update.location.as_ref()).is_err() {
                continue;
            }
            if let Some(mut entry) = self.entries.get_mut(&update.id) {
                entry.tier = update.tier;
                entry.location = update.location.clone();
                entry.migrated_at = Some(now);
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn statistics(&self) -> Result<TierStatistics, TierIndexError> {
        let mut stats = TierStatistics::default();
        for entry in &self.entries {
            let usage = match entry.tier {
                Tier::Hot => &mut stats.hot,
                Tier::Warm => &mut stats.warm,
                Tier::Cold => &mut stats.cold,
            };
            usage.entries += 1;
            usage.bytes += entry.size_bytes;
        }
        Ok(stats)
    }

    async fn access_stats(
        &self,
        id: &str,
        window_ms: i64,
    ) -> Result<AccessStats, TierIndexError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| TierIndexError::NotFound(id.to_string()))?;
        let now = self.clock.now_millis();

        let recent_accesses = self
            .access_log
            .get(id)
            .map(|log| log.iter().filter(|at| now - **at <= window_ms).count() as u64)
            .unwrap_or(0);

        Ok(AccessStats {
            total_accesses: entry.access_count,
            recent_accesses,
            last_accessed_at: entry.accessed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use terrace_core::ManualClock;

    use super::*;

    fn make_index() -> (Arc<ManualClock>, InMemoryTierIndex) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let index = InMemoryTierIndex::with_clock(clock.clone());
        (clock, index)
    }

    // -- record / get / update --

    #[tokio::test]
    async fn record_creates_hot_row() {
        let (_clock, index) = make_index();
        let row = index
            .record(NewTierEntry::hot("a", SourceTable::Things, 256))
            .await
            .unwrap();

        assert_eq!(row.tier, Tier::Hot);
        assert!(row.location.is_none());
        assert_eq!(row.created_at, 1_000_000);
        assert_eq!(index.get("a").await.unwrap().unwrap(), row);
    }

    #[tokio::test]
    async fn record_duplicate_fails() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap();
        let err = index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap_err();
        assert_eq!(err, TierIndexError::Duplicate("a".to_string()));
    }

    #[tokio::test]
    async fn tier_location_invariant_enforced() {
        let (_clock, index) = make_index();

        // Hot with location is invalid.
        let err = index
            .record(NewTierEntry {
                id: "a".to_string(),
                source_table: SourceTable::Things,
                tier: Tier::Hot,
                location: Some("somewhere".to_string()),
                size_bytes: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TierIndexError::Invariant(_)));

        // Cold without location is invalid.
        let err = index
            .record(NewTierEntry {
                id: "b".to_string(),
                source_table: SourceTable::Things,
                tier: Tier::Cold,
                location: None,
                size_bytes: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TierIndexError::Invariant(_)));
    }

    #[tokio::test]
    async fn update_patches_tier_and_location_together() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap();

        let row = index
            .update(
                "a",
                TierPatch {
                    tier: Some(Tier::Warm),
                    location: Some(Some("warm/batch-1.parquet".to_string())),
                },
            )
            .await
            .unwrap();
        assert_eq!(row.tier, Tier::Warm);
        assert_eq!(row.location.as_deref(), Some("warm/batch-1.parquet"));

        // Patching back to hot must also null the location.
        let err = index
            .update(
                "a",
                TierPatch {
                    tier: Some(Tier::Hot),
                    location: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TierIndexError::Invariant(_)));
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let (_clock, index) = make_index();
        let err = index.update("ghost", TierPatch::default()).await.unwrap_err();
        assert_eq!(err, TierIndexError::NotFound("ghost".to_string()));
    }

    // -- touch / access stats --

    #[tokio::test]
    async fn touch_bumps_count_and_timestamp() {
        let (clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap();

        clock.advance(500);
        index.touch("a").await.unwrap();
        index.touch("a").await.unwrap();

        let row = index.get("a").await.unwrap().unwrap();
        assert_eq!(row.access_count, 2);
        assert_eq!(row.accessed_at, Some(1_000_500));
    }

    #[tokio::test]
    async fn access_stats_window_counts_recent_only() {
        let (clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap();

        index.touch("a").await.unwrap();
        clock.advance(10_000);
        index.touch("a").await.unwrap();
        index.touch("a").await.unwrap();

        let stats = index.access_stats("a", 5_000).await.unwrap();
        assert_eq!(stats.total_accesses, 3);
        assert_eq!(stats.recent_accesses, 2);
        assert_eq!(stats.last_accessed_at, Some(1_010_000));
    }

    // -- eligible --

    #[tokio::test]
    async fn eligible_filters_by_tier_and_access() {
        let (clock, index) = make_index();
        for id in ["old-cold-candidate", "busy", "fresh"] {
            index
                .record(NewTierEntry::hot(id, SourceTable::Things, 10))
                .await
                .unwrap();
        }
        // "busy" gets heavy access; "fresh" was touched just now.
        for _ in 0..10 {
            index.touch("busy").await.unwrap();
        }
        clock.advance(60_000);
        index.touch("fresh").await.unwrap();

        let rows = index
            .eligible(&EligibilityQuery {
                access_threshold_ms: Some(30_000),
                max_access_count: Some(5),
                ..EligibilityQuery::for_tier(Tier::Hot)
            })
            .await
            .unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["old-cold-candidate"]);
    }

    #[tokio::test]
    async fn eligible_orders_and_limits() {
        let (clock, index) = make_index();
        for id in ["a", "b", "c"] {
            index
                .record(NewTierEntry::hot(id, SourceTable::Things, 10))
                .await
                .unwrap();
            clock.advance(1_000);
        }

        let newest_first = index
            .eligible(&EligibilityQuery {
                order_direction: OrderDirection::Descending,
                limit: Some(2),
                ..EligibilityQuery::for_tier(Tier::Hot)
            })
            .await
            .unwrap();
        let ids: Vec<&str> = newest_first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn eligible_orders_by_access_count() {
        let (_clock, index) = make_index();
        for (id, touches) in [("a", 3), ("b", 1), ("c", 2)] {
            index
                .record(NewTierEntry::hot(id, SourceTable::Things, 10))
                .await
                .unwrap();
            for _ in 0..touches {
                index.touch(id).await.unwrap();
            }
        }

        let coldest_first = index
            .eligible(&EligibilityQuery {
                order_by: OrderBy::AccessCount,
                ..EligibilityQuery::for_tier(Tier::Hot)
            })
            .await
            .unwrap();
        let ids: Vec<&str> = coldest_first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    // -- migrate --

    #[tokio::test]
    async fn migrate_applies_batch_and_stamps_time() {
        let (clock, index) = make_index();
        for id in ["a", "b"] {
            index
                .record(NewTierEntry::hot(id, SourceTable::Things, 10))
                .await
                .unwrap();
        }

        clock.advance(5_000);
        let applied = index
            .migrate(
                &[
                    TierUpdate {
                        id: "a".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/batch-1.parquet".to_string()),
                    },
                    TierUpdate {
                        id: "b".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/batch-1.parquet".to_string()),
                    },
                ],
                true,
            )
            .await
            .unwrap();

        assert_eq!(applied, 2);
        let row = index.get("a").await.unwrap().unwrap();
        assert_eq!(row.tier, Tier::Warm);
        assert_eq!(row.migrated_at, Some(1_005_000));
    }

    #[tokio::test]
    async fn atomic_migrate_failure_modifies_nothing() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 10))
            .await
            .unwrap();

        let err = index
            .migrate(
                &[
                    TierUpdate {
                        id: "a".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/x".to_string()),
                    },
                    TierUpdate {
                        id: "ghost".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/x".to_string()),
                    },
                ],
                true,
            )
            .await
            .unwrap_err();
        assert_eq!(err, TierIndexError::NotFound("ghost".to_string()));

        // Row "a" is untouched.
        let row = index.get("a").await.unwrap().unwrap();
        assert_eq!(row.tier, Tier::Hot);
        assert!(row.migrated_at.is_none());
    }

    #[tokio::test]
    async fn non_atomic_migrate_applies_what_it_can() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 10))
            .await
            .unwrap();

        let applied = index
            .migrate(
                &[
                    TierUpdate {
                        id: "a".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/x".to_string()),
                    },
                    TierUpdate {
                        id: "ghost".to_string(),
                        tier: Tier::Warm,
                        location: Some("warm/x".to_string()),
                    },
                ],
                false,
            )
            .await
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(index.get("a").await.unwrap().unwrap().tier, Tier::Warm);
    }

    // -- statistics / remove --

    #[tokio::test]
    async fn statistics_aggregate_per_tier() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 100))
            .await
            .unwrap();
        index
            .record(NewTierEntry::hot("b", SourceTable::Things, 50))
            .await
            .unwrap();
        index
            .migrate(
                &[TierUpdate {
                    id: "b".to_string(),
                    tier: Tier::Cold,
                    location: Some("clusters/c0.parquet".to_string()),
                }],
                true,
            )
            .await
            .unwrap();

        let stats = index.statistics().await.unwrap();
        assert_eq!(stats.hot, TierUsage { entries: 1, bytes: 100 });
        assert_eq!(stats.cold, TierUsage { entries: 1, bytes: 50 });
        assert_eq!(stats.total().entries, 2);
        assert_eq!(stats.total().bytes, 150);
    }

    #[tokio::test]
    async fn remove_deletes_row_and_history() {
        let (_clock, index) = make_index();
        index
            .record(NewTierEntry::hot("a", SourceTable::Things, 1))
            .await
            .unwrap();
        index.touch("a").await.unwrap();

        let removed = index.remove("a").await.unwrap().unwrap();
        assert_eq!(removed.id, "a");
        assert!(index.get("a").await.unwrap().is_none());
        assert!(index.remove("a").await.unwrap().is_none());
    }
}
