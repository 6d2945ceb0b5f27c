//! Tiered storage: the durable placement index and the hot/warm/cold
//! migration policy engine.
//!
//! Entries enter the system hot, migrate warm-ward and cold-ward under the
//! policy engine, and only ever leave by explicit delete. Migration is
//! one-way; the read path never rehydrates placements.

use serde::{Deserialize, Serialize};
use terrace_core::SourceTable;
use thiserror::Error;

mod engine;
mod index;
mod policy;

pub use engine::{
    spawn_daemon, BatchOutcome, EntrySource, MigrationEngine, MigrationEngineConfig,
    MigrationError, MigrationRunReport, MigrationStatistics, PartitionSink,
};
pub use index::{
    EligibilityQuery, InMemoryTierIndex, NewTierEntry, OrderBy, OrderDirection, TierIndex,
    TierPatch, TierStatistics, TierUpdate, TierUsage,
};
pub use policy::{
    evaluate, select_batch, AccessStats, BatchSelection, BatchSizePolicy, HotToWarmPolicy,
    MigrationCandidate, MigrationDecision, MigrationPolicyConfig, TierUsageView, WarmToColdPolicy,
    PRIORITY_EMERGENCY, PRIORITY_ORDINARY,
};

/// Storage tier of an indexed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    /// Lowercase tier name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

/// Error kinds surfaced by the tier index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierIndexError {
    /// The id has no index row.
    #[error("tier index entry '{0}' not found")]
    NotFound(String),

    /// `record` called for an id that already has a row.
    #[error("tier index entry '{0}' already exists")]
    Duplicate(String),

    /// A mutation would break the tier/location invariant.
    #[error("tier invariant violation: {0}")]
    Invariant(String),

    /// Underlying storage I/O failure; retryable by the caller.
    #[error("tier index storage failure: {0}")]
    Storage(String),
}

/// One row of the tier index: where an item lives and how it is used.
///
/// Invariants: hot rows have no location; warm/cold rows have a location
/// that resolves in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierIndexEntry {
    pub id: String,
    pub source_table: SourceTable,
    pub tier: Tier,
    /// Blob key for warm/cold rows, `None` for hot.
    pub location: Option<String>,
    /// Approximate item payload size, drives batch byte budgets.
    pub size_bytes: u64,
    /// Row creation time, unix milliseconds.
    pub created_at: i64,
    /// Last migration time, unix milliseconds.
    pub migrated_at: Option<i64>,
    /// Last access time, unix milliseconds.
    pub accessed_at: Option<i64>,
    pub access_count: u64,
}

impl TierIndexEntry {
    /// Age of the row relative to `now`, clamped at zero.
    #[must_use]
    pub fn age_ms(&self, now: i64) -> i64 {
        (now - self.created_at).max(0)
    }

    /// Time spent in the current tier: since the last migration, or since
    /// creation for never-migrated rows.
    #[must_use]
    pub fn tier_age_ms(&self, now: i64) -> i64 {
        (now - self.migrated_at.unwrap_or(self.created_at)).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(tier: Tier, location: Option<&str>) -> TierIndexEntry {
        TierIndexEntry {
            id: "item".to_string(),
            source_table: SourceTable::Things,
            tier,
            location: location.map(str::to_string),
            size_bytes: 100,
            created_at: 1_000,
            migrated_at: None,
            accessed_at: None,
            access_count: 0,
        }
    }

    #[test]
    fn tier_names() {
        assert_eq!(Tier::Hot.as_str(), "hot");
        assert_eq!(Tier::Warm.as_str(), "warm");
        assert_eq!(Tier::Cold.as_str(), "cold");
    }

    #[test]
    fn age_clamps_at_zero() {
        let entry = make_entry(Tier::Hot, None);
        assert_eq!(entry.age_ms(500), 0);
        assert_eq!(entry.age_ms(3_000), 2_000);
    }

    #[test]
    fn tier_age_prefers_migration_time() {
        let mut entry = make_entry(Tier::Warm, Some("warm/batch-1.parquet"));
        entry.migrated_at = Some(2_000);
        assert_eq!(entry.tier_age_ms(5_000), 3_000);
    }
}
