//! Top-k ranking and merge rules.
//!
//! Ordering everywhere: higher similarity first, ties broken by
//! lexicographic id ascending. Per-partition candidates run through a
//! bounded min-heap so a partition scan holds at most `limit` hits.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use super::types::SearchHit;

/// Heap wrapper ordered so the *worst* hit is at the top: lower similarity
/// is greater, and among equal similarities the larger id is greater.
struct WorstFirst(SearchHit);

impl PartialEq for WorstFirst {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WorstFirst {}

impl PartialOrd for WorstFirst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorstFirst {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(other.0.similarity)
            .cmp(&OrderedFloat(self.0.similarity))
            .then_with(|| self.0.id.cmp(&other.0.id))
    }
}

/// Bounded top-k accumulator keyed by similarity.
pub(super) struct TopK {
    limit: usize,
    heap: BinaryHeap<WorstFirst>,
}

impl TopK {
    pub(super) fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit + 1),
        }
    }

    /// Offers a hit, evicting the current worst when over capacity.
    pub(super) fn push(&mut self, hit: SearchHit) {
        if self.limit == 0 {
            return;
        }
        self.heap.push(WorstFirst(hit));
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    /// Drains into best-first order.
    pub(super) fn into_sorted(self) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self.heap.into_iter().map(|entry| entry.0).collect();
        sort_hits(&mut hits);
        hits
    }
}

/// Best-first: similarity descending, then id ascending.
pub(super) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        OrderedFloat(b.similarity)
            .cmp(&OrderedFloat(a.similarity))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Merges per-partition top-k lists into a global top-`limit`, preserving
/// the ordering and tie-break rules.
pub(super) fn merge_partitions(parts: Vec<Vec<SearchHit>>, limit: usize) -> Vec<SearchHit> {
    let mut top = TopK::new(limit);
    for part in parts {
        for hit in part {
            top.push(hit);
        }
    }
    top.into_sorted()
}

/// Merges hot- and cold-tier results, deduplicating by id.
///
/// On collision the hot similarity wins (the hot copy is live) unless
/// `prefer_cold_similarity` is set; the cold payload is kept either way,
/// since hot entries may be reduced sketches. Output is re-sorted and
/// truncated to `limit`.
#[must_use]
pub fn merge_hot_cold(
    hot: Vec<SearchHit>,
    cold: Vec<SearchHit>,
    prefer_cold_similarity: bool,
    limit: usize,
) -> Vec<SearchHit> {
    let mut merged: Vec<SearchHit> = Vec::with_capacity(hot.len() + cold.len());
    let mut cold_by_id: std::collections::HashMap<String, SearchHit> = cold
        .into_iter()
        .map(|hit| (hit.id.clone(), hit))
        .collect();

    for hot_hit in hot {
        match cold_by_id.remove(&hot_hit.id) {
            Some(cold_hit) => {
                let similarity = if prefer_cold_similarity {
                    cold_hit.similarity
                } else {
                    hot_hit.similarity
                };
                merged.push(SearchHit {
                    id: hot_hit.id,
                    similarity,
                    entry: cold_hit.entry.or(hot_hit.entry),
                });
            }
            None => merged.push(hot_hit),
        }
    }
    merged.extend(cold_by_id.into_values());

    sort_hits(&mut merged);
    merged.truncate(limit);
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
