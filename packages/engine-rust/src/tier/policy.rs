//! Migration policy: per-entry decisions and batch selection.
//!
//! [`evaluate`] votes on a single entry; [`select_batch`] turns the ordered
//! candidate set into an executable batch under count/byte budgets. The two
//! levels are deliberately distinct: `MigrationDecision::should_migrate` is
//! an item verdict, `BatchSelection::should_proceed` is a batch verdict.

use serde::{Deserialize, Serialize};

use super::{Tier, TierIndexEntry};

/// Priority of a pressure-driven decision; overrides keep-hot votes.
pub const PRIORITY_EMERGENCY: u8 = 0;
/// Priority of an ordinary age/idleness decision.
pub const PRIORITY_ORDINARY: u8 = 1;

/// Sliding-window access statistics for one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub total_accesses: u64,
    /// Accesses within the policy's `access_window_ms`.
    pub recent_accesses: u64,
    pub last_accessed_at: Option<i64>,
}

/// Hot-to-warm thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotToWarmPolicy {
    /// Entries older than this migrate.
    pub max_age_ms: i64,
    /// Entries with fewer recent accesses than this migrate.
    pub min_access_count: u64,
    /// Hot fill fraction above which pressure migration engages.
    pub max_hot_size_percent: f64,
    /// Window for `recent_accesses`; defaults to `max_age_ms` when unset.
    pub access_window_ms: Option<i64>,
}

/// Warm-to-cold thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmToColdPolicy {
    /// Time in warm after which entries migrate cold-ward.
    pub max_age_ms: i64,
    /// Do not cold-write partitions smaller than this.
    pub min_partition_size_bytes: u64,
    /// Optional deletion horizon for cold entries.
    pub retention_period_ms: Option<i64>,
}

/// Batch sizing budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSizePolicy {
    pub min: usize,
    pub max: usize,
    pub target_bytes: u64,
}

/// Complete migration policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPolicyConfig {
    pub hot_to_warm: HotToWarmPolicy,
    pub warm_to_cold: WarmToColdPolicy,
    pub batch: BatchSizePolicy,
}

impl Default for MigrationPolicyConfig {
    fn default() -> Self {
        Self {
            hot_to_warm: HotToWarmPolicy {
                max_age_ms: 86_400_000,
                min_access_count: 5,
                max_hot_size_percent: 0.9,
                access_window_ms: None,
            },
            warm_to_cold: WarmToColdPolicy {
                max_age_ms: 7 * 86_400_000,
                min_partition_size_bytes: 1_048_576,
                retention_period_ms: None,
            },
            batch: BatchSizePolicy {
                min: 10,
                max: 500,
                target_bytes: 64 * 1_048_576,
            },
        }
    }
}

/// Fill state of a tier, for the pressure rule.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TierUsageView {
    /// Fraction of the tier's capacity in use, 0.0 to 1.0.
    pub percent_full: f64,
}

/// Verdict for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDecision {
    pub should_migrate: bool,
    /// Human-readable reason, carried into migration event metadata.
    pub reason: String,
    pub target_tier: Option<Tier>,
    pub priority: Option<u8>,
    pub is_emergency: bool,
}

impl MigrationDecision {
    fn keep(reason: impl Into<String>) -> Self {
        Self {
            should_migrate: false,
            reason: reason.into(),
            target_tier: None,
            priority: None,
            is_emergency: false,
        }
    }

    fn migrate(reason: impl Into<String>, target: Tier, priority: u8) -> Self {
        Self {
            should_migrate: true,
            reason: reason.into(),
            target_tier: Some(target),
            priority: Some(priority),
            is_emergency: priority == PRIORITY_EMERGENCY,
        }
    }
}

/// Decides whether one entry should migrate, and where.
///
/// Hot entries: pressure above `max_hot_size_percent` is an emergency
/// (priority 0) that migrates regardless of age or activity; otherwise
/// age beyond `max_age_ms` or recent accesses below `min_access_count`
/// are ordinary (priority 1) warm-ward votes. Warm entries migrate
/// cold-ward once their time in warm exceeds the warm policy's
/// `max_age_ms`. Cold entries never move.
#[must_use]
pub fn evaluate(
    config: &MigrationPolicyConfig,
    entry: &TierIndexEntry,
    access: &AccessStats,
    hot_usage: &TierUsageView,
    now_ms: i64,
) -> MigrationDecision {
    match entry.tier {
        Tier::Hot => {
            let policy = &config.hot_to_warm;
            if hot_usage.percent_full > policy.max_hot_size_percent {
                return MigrationDecision::migrate(
                    format!(
                        "hot tier under pressure: {:.0}% full exceeds {:.0}% threshold",
                        hot_usage.percent_full * 100.0,
                        policy.max_hot_size_percent * 100.0
                    ),
                    Tier::Warm,
                    PRIORITY_EMERGENCY,
                );
            }

            let age = entry.age_ms(now_ms);
            if age > policy.max_age_ms {
                return MigrationDecision::migrate(
                    format!("age {age}ms exceeds hot max age {}ms", policy.max_age_ms),
                    Tier::Warm,
                    PRIORITY_ORDINARY,
                );
            }
            if access.recent_accesses < policy.min_access_count {
                return MigrationDecision::migrate(
                    format!(
                        "{} recent accesses below minimum {}",
                        access.recent_accesses, policy.min_access_count
                    ),
                    Tier::Warm,
                    PRIORITY_ORDINARY,
                );
            }
            MigrationDecision::keep("within hot thresholds")
        }
        Tier::Warm => {
            let policy = &config.warm_to_cold;
            let tier_age = entry.tier_age_ms(now_ms);
            if tier_age > policy.max_age_ms {
                return MigrationDecision::migrate(
                    format!(
                        "time in warm {tier_age}ms exceeds max {}ms",
                        policy.max_age_ms
                    ),
                    Tier::Cold,
                    PRIORITY_ORDINARY,
                );
            }
            MigrationDecision::keep("within warm thresholds")
        }
        Tier::Cold => MigrationDecision::keep("already cold"),
    }
}

/// One candidate: the entry plus its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationCandidate {
    pub entry: TierIndexEntry,
    pub decision: MigrationDecision,
}

/// Batch-level verdict over an ordered candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSelection {
    pub items: Vec<MigrationCandidate>,
    pub total_bytes: u64,
    pub should_proceed: bool,
    pub reason: String,
}

/// Selects an executable batch from migration-voted candidates.
///
/// Candidates are ordered by priority ascending (stable, preserving the
/// tier-index scan order within a priority) and accumulated until the
/// count reaches `batch.max`, cumulative bytes exceed `batch.target_bytes`,
/// or the stream is exhausted. A batch below `batch.min` does not proceed
/// unless it contains an emergency-priority item.
#[must_use]
pub fn select_batch(
    candidates: Vec<MigrationCandidate>,
    batch: &BatchSizePolicy,
) -> BatchSelection {
    let mut ordered = candidates;
    ordered.sort_by_key(|candidate| candidate.decision.priority.unwrap_or(u8::MAX));

    let mut items = Vec::new();
    let mut total_bytes = 0u64;
    for candidate in ordered {
        if !candidate.decision.should_migrate {
            continue;
        }
        if items.len() >= batch.max {
            break;
        }
        total_bytes += candidate.entry.size_bytes;
        items.push(candidate);
        if total_bytes > batch.target_bytes {
            break;
        }
    }

    let has_emergency = items.iter().any(|candidate| candidate.decision.is_emergency);
    if items.is_empty() {
        return BatchSelection {
            items,
            total_bytes: 0,
            should_proceed: false,
            reason: "no migratable candidates".to_string(),
        };
    }
    if items.len() < batch.min && !has_emergency {
        let reason = format!(
            "batch of {} below minimum {} with no emergency items",
            items.len(),
            batch.min
        );
        return BatchSelection {
            items,
            total_bytes,
            should_proceed: false,
            reason,
        };
    }

    let reason = if has_emergency {
        format!("{} items ({total_bytes} bytes), emergency present", items.len())
    } else {
        format!("{} items ({total_bytes} bytes)", items.len())
    };
    BatchSelection {
        items,
        total_bytes,
        should_proceed: true,
        reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
