//! The cluster manager: owns centroids, assigns vectors, maintains the
//! routing index.
//!
//! Mutations (`assign`, `reassign`, `recluster`) are serialised behind a
//! write lock; `nearest_clusters` and `snapshot` read a consistent view and
//! may proceed concurrently with writers. Re-clustering computes off-lock
//! on a caller-supplied corpus and swaps the whole cluster set in one
//! critical section; while it runs, mutating calls fail fast with
//! [`ClusterError::Busy`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use terrace_core::{
    check_dimension, distance, validate_unit_norm, Clock, DistanceMetric, SystemClock, Vector,
};

use crate::events::EventSink;

use super::kmeans;
use super::types::{
    Centroid, ClusterAssignment, ClusterIndex, ClusterInfo, ClusterRouter, ClusterStats,
};
use super::{ClusterConfig, ClusterError};

/// Stream that cluster-set level events (initialise, recluster) append to.
const MANAGER_STREAM: &str = "cluster-manager";

/// Outcome of an offline re-clustering run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclusterOutcome {
    /// Lloyd iterations executed.
    pub iterations: usize,
    /// Whether mean centroid movement fell below tolerance.
    pub converged: bool,
    /// Vectors reassigned.
    pub total_vectors: u64,
}

/// A vector's current placement plus the vector itself.
///
/// The vector is retained so `reassign` can decrement the previous centroid
/// exactly.
#[derive(Debug, Clone)]
struct AssignedVector {
    assignment: ClusterAssignment,
    vector: Vector,
}

#[derive(Debug, Default)]
struct ManagerState {
    centroids: BTreeMap<String, Centroid>,
    assignments: BTreeMap<String, AssignedVector>,
}

impl ManagerState {
    /// Nearest centroid to `vector` under `metric`; ties break to the
    /// lexicographically smallest cluster id.
    fn nearest(&self, metric: DistanceMetric, vector: &[f32]) -> Option<(String, f32)> {
        self.centroids
            .values()
            .map(|centroid| {
                // Dimensions were validated at the boundary.
                let d = distance(metric, vector, &centroid.vector).unwrap_or(f32::INFINITY);
                (centroid.cluster_id.clone(), d)
            })
            .min_by_key(|(id, d)| (OrderedFloat(*d), id.clone()))
    }
}

/// Resets the busy flag when a re-cluster run ends, on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// See the module docs.
pub struct ClusterManager {
    config: ClusterConfig,
    state: RwLock<ManagerState>,
    published: ArcSwap<ClusterIndex>,
    version: AtomicU64,
    busy: AtomicBool,
    events: Option<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("num_clusters", &self.config.num_clusters)
            .field("dimension", &self.config.dimension)
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ClusterManager {
    /// Creates a manager with no event sink and the system clock.
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self::with_parts(config, None, Arc::new(SystemClock))
    }

    /// Creates a manager with every seam injected.
    #[must_use]
    pub fn with_parts(
        config: ClusterConfig,
        events: Option<Arc<dyn EventSink>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(ManagerState::default()),
            published: ArcSwap::new(Arc::new(ClusterIndex::empty())),
            version: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            events,
            clock,
        }
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Blob key of a cluster's cold partition.
    #[must_use]
    pub fn partition_key(&self, cluster_id: &str) -> String {
        format!("{}/{cluster_id}.parquet", self.config.partition_key_prefix)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), ClusterError> {
        check_dimension(vector, self.config.dimension)?;
        if self.config.metric == DistanceMetric::Cosine {
            validate_unit_norm(vector, self.config.unit_norm_epsilon)?;
        }
        Ok(())
    }

    fn check_not_busy(&self) -> Result<(), ClusterError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(ClusterError::Busy);
        }
        Ok(())
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn emit(&self, stream_id: &str, event_type: &str, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            // Assignments are the source of truth; event emission is
            // best-effort and must not roll back an applied mutation.
            if let Err(err) = events.emit(stream_id, event_type, payload).await {
                tracing::warn!(stream_id, event_type, error = %err, "event emit failed");
            }
        }
    }

    // -- bootstrap --

    /// Picks the initial `num_clusters` centroids from `seed_vectors` via
    /// k-means++ seeding.
    ///
    /// # Errors
    ///
    /// [`ClusterError::InsufficientSeeds`] with fewer seeds than clusters,
    /// [`ClusterError::AlreadyInitialised`] when a centroid set exists,
    /// plus dimension/norm validation failures.
    pub async fn initialise_centroids(&self, seed_vectors: &[Vector]) -> Result<(), ClusterError> {
        self.check_not_busy()?;
        for seed in seed_vectors {
            self.check_vector(seed)?;
        }
        if seed_vectors.len() < self.config.num_clusters {
            return Err(ClusterError::InsufficientSeeds {
                needed: self.config.num_clusters,
                got: seed_vectors.len(),
            });
        }

        let now = self.clock.now_millis();
        {
            let mut state = self.state.write();
            if !state.centroids.is_empty() {
                return Err(ClusterError::AlreadyInitialised);
            }

            let mut rng = rand::rng();
            let picked = kmeans::kmeans_pp_seed(seed_vectors, self.config.num_clusters, &mut rng);
            for (index, vector) in picked.into_iter().enumerate() {
                let cluster_id = format!("c{index}");
                state.centroids.insert(
                    cluster_id.clone(),
                    Centroid {
                        cluster_id,
                        dimension: vector.len(),
                        vector,
                        vector_count: 0,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
            self.bump_version();
        }

        self.emit(
            MANAGER_STREAM,
            "centroids_initialised",
            serde_json::json!({
                "clusterCount": self.config.num_clusters,
                "dimension": self.config.dimension,
            }),
        )
        .await;
        Ok(())
    }

    // -- reads --

    /// The `n` nearest clusters to `query_vector`, ascending by distance,
    /// ties broken by lexicographic cluster id.
    ///
    /// # Errors
    ///
    /// [`ClusterError::NotInitialised`] before bootstrap, plus dimension
    /// validation failures.
    pub fn nearest_clusters(
        &self,
        query_vector: &[f32],
        n: usize,
    ) -> Result<Vec<(String, f32)>, ClusterError> {
        check_dimension(query_vector, self.config.dimension)?;

        let state = self.state.read();
        if state.centroids.is_empty() {
            return Err(ClusterError::NotInitialised);
        }

        let mut ranked: Vec<(String, f32)> = state
            .centroids
            .values()
            .map(|centroid| {
                let d = distance(self.config.metric, query_vector, &centroid.vector)
                    .unwrap_or(f32::INFINITY);
                (centroid.cluster_id.clone(), d)
            })
            .collect();
        ranked.sort_by_key(|(id, d)| (OrderedFloat(*d), id.clone()));
        ranked.truncate(n);
        Ok(ranked)
    }

    /// Derived statistics for one cluster, recomputed from current
    /// assignments.
    ///
    /// # Errors
    ///
    /// [`ClusterError::UnknownCluster`] for an absent id.
    pub fn stats(&self, cluster_id: &str) -> Result<ClusterStats, ClusterError> {
        let state = self.state.read();
        let centroid = state
            .centroids
            .get(cluster_id)
            .ok_or_else(|| ClusterError::UnknownCluster(cluster_id.to_string()))?;

        let mut count = 0u64;
        let mut sum = 0.0f32;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for assigned in state.assignments.values() {
            if assigned.assignment.cluster_id == cluster_id {
                count += 1;
                sum += assigned.assignment.distance;
                min = min.min(assigned.assignment.distance);
                max = max.max(assigned.assignment.distance);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let average_distance = if count == 0 { 0.0 } else { sum / count as f32 };
        Ok(ClusterStats {
            cluster_id: cluster_id.to_string(),
            vector_count: count,
            average_distance,
            min_distance: if count == 0 { 0.0 } else { min },
            max_distance: if count == 0 { 0.0 } else { max },
            last_updated: centroid.updated_at,
        })
    }

    /// An owned copy of the current cluster index.
    #[must_use]
    pub fn snapshot(&self) -> ClusterIndex {
        (*self.cluster_index()).clone()
    }

    /// The current assignment of a vector, if any.
    #[must_use]
    pub fn assignment(&self, vector_id: &str) -> Option<ClusterAssignment> {
        self.state
            .read()
            .assignments
            .get(vector_id)
            .map(|assigned| assigned.assignment.clone())
    }

    /// Total assigned vectors across all clusters.
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.state.read().assignments.len()
    }

    fn build_index(&self) -> ClusterIndex {
        let state = self.state.read();
        let clusters: Vec<ClusterInfo> = state
            .centroids
            .values()
            .map(|centroid| ClusterInfo {
                cluster_id: centroid.cluster_id.clone(),
                centroid: centroid.vector.clone(),
                vector_count: centroid.vector_count,
                partition_key: self.partition_key(&centroid.cluster_id),
            })
            .collect();
        ClusterIndex {
            version: self.version.load(Ordering::SeqCst),
            cluster_count: clusters.len(),
            total_vectors: clusters.iter().map(|c| c.vector_count).sum(),
            clusters,
        }
    }

    // -- writes --

    /// Assigns a vector to its nearest centroid, folding it into the
    /// centroid mean when incremental updates are enabled.
    ///
    /// Assigning an id that already has a placement replaces it with full
    /// reassign semantics, preserving the one-assignment-per-vector
    /// invariant.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Busy`] during re-clustering,
    /// [`ClusterError::NotInitialised`] before bootstrap, plus
    /// dimension/norm validation failures.
    pub async fn assign(
        &self,
        vector_id: &str,
        vector: Vector,
    ) -> Result<ClusterAssignment, ClusterError> {
        self.check_not_busy()?;
        self.check_vector(&vector)?;

        let assignment = {
            let mut state = self.state.write();
            let assignment = self.place_locked(&mut state, vector_id, vector)?;
            self.bump_version();
            assignment
        };

        self.emit(
            &format!("cluster-{}", assignment.cluster_id),
            "vector_assigned",
            serde_json::to_value(&assignment).unwrap_or_default(),
        )
        .await;
        Ok(assignment)
    }

    /// Assigns a batch; semantically equivalent to sequential [`assign`]
    /// calls in array order, with centroid updates folding in order.
    ///
    /// Validation is all-or-nothing: any invalid item fails the batch
    /// before the first placement.
    ///
    /// # Errors
    ///
    /// As [`assign`].
    ///
    /// [`assign`]: ClusterManager::assign
    pub async fn assign_batch(
        &self,
        items: Vec<(String, Vector)>,
    ) -> Result<Vec<ClusterAssignment>, ClusterError> {
        self.check_not_busy()?;
        for (_, vector) in &items {
            self.check_vector(vector)?;
        }

        let assignments = {
            let mut state = self.state.write();
            let mut assignments = Vec::with_capacity(items.len());
            for (vector_id, vector) in items {
                assignments.push(self.place_locked(&mut state, &vector_id, vector)?);
            }
            self.bump_version();
            assignments
        };

        for assignment in &assignments {
            self.emit(
                &format!("cluster-{}", assignment.cluster_id),
                "vector_assigned",
                serde_json::to_value(assignment).unwrap_or_default(),
            )
            .await;
        }
        Ok(assignments)
    }

    /// Replaces an existing assignment: the previous centroid is
    /// decremented by the old vector and the new nearest centroid is
    /// incremented.
    ///
    /// # Errors
    ///
    /// [`ClusterError::UnknownVector`] when no assignment exists, otherwise
    /// as [`assign`].
    ///
    /// [`assign`]: ClusterManager::assign
    pub async fn reassign(
        &self,
        vector_id: &str,
        vector: Vector,
    ) -> Result<ClusterAssignment, ClusterError> {
        self.check_not_busy()?;
        self.check_vector(&vector)?;

        let assignment = {
            let mut state = self.state.write();
            if !state.assignments.contains_key(vector_id) {
                return Err(ClusterError::UnknownVector(vector_id.to_string()));
            }
            let assignment = self.place_locked(&mut state, vector_id, vector)?;
            self.bump_version();
            assignment
        };

        self.emit(
            &format!("cluster-{}", assignment.cluster_id),
            "vector_reassigned",
            serde_json::to_value(&assignment).unwrap_or_default(),
        )
        .await;
        Ok(assignment)
    }

    /// Removes a vector's assignment, decrementing its centroid.
    ///
    /// Returns the removed assignment, or `None` when the id was unknown.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Busy`] during re-clustering.
    pub async fn unassign(
        &self,
        vector_id: &str,
    ) -> Result<Option<ClusterAssignment>, ClusterError> {
        self.check_not_busy()?;

        let removed = {
            let mut state = self.state.write();
            let Some(removed) = state.assignments.remove(vector_id) else {
                return Ok(None);
            };
            Self::decrement_centroid_locked(
                &mut state,
                &removed.assignment.cluster_id,
                &removed.vector,
                self.config.enable_incremental_updates,
                self.clock.now_millis(),
            );
            self.bump_version();
            removed.assignment
        };

        self.emit(
            &format!("cluster-{}", removed.cluster_id),
            "vector_unassigned",
            serde_json::json!({"vectorId": vector_id}),
        )
        .await;
        Ok(Some(removed))
    }

    /// Places (or re-places) a vector under the held write lock.
    fn place_locked(
        &self,
        state: &mut ManagerState,
        vector_id: &str,
        vector: Vector,
    ) -> Result<ClusterAssignment, ClusterError> {
        if state.centroids.is_empty() {
            return Err(ClusterError::NotInitialised);
        }
        let now = self.clock.now_millis();

        // Replacing an existing assignment first gives back the old mass.
        if let Some(previous) = state.assignments.remove(vector_id) {
            Self::decrement_centroid_locked(
                state,
                &previous.assignment.cluster_id,
                &previous.vector,
                self.config.enable_incremental_updates,
                now,
            );
        }

        let (cluster_id, d) = state
            .nearest(self.config.metric, &vector)
            .ok_or(ClusterError::NotInitialised)?;

        if let Some(centroid) = state.centroids.get_mut(&cluster_id) {
            if self.config.enable_incremental_updates {
                #[allow(clippy::cast_precision_loss)]
                let count = centroid.vector_count as f32;
                for (slot, value) in centroid.vector.iter_mut().zip(vector.iter()) {
                    *slot = (*slot * count + value) / (count + 1.0);
                }
            }
            centroid.vector_count += 1;
            centroid.updated_at = now;
        }

        let assignment = ClusterAssignment {
            vector_id: vector_id.to_string(),
            cluster_id,
            distance: d,
            assigned_at: now,
        };
        state.assignments.insert(
            vector_id.to_string(),
            AssignedVector {
                assignment: assignment.clone(),
                vector,
            },
        );
        Ok(assignment)
    }

    fn decrement_centroid_locked(
        state: &mut ManagerState,
        cluster_id: &str,
        vector: &[f32],
        incremental: bool,
        now: i64,
    ) {
        let Some(centroid) = state.centroids.get_mut(cluster_id) else {
            return;
        };
        match centroid.vector_count {
            0 => {}
            1 => {
                // Last member leaves; the mean of zero vectors is
                // undefined, so the centroid keeps its final position.
                centroid.vector_count = 0;
                centroid.updated_at = now;
            }
            count => {
                if incremental {
                    #[allow(clippy::cast_precision_loss)]
                    let count_f = count as f32;
                    for (slot, value) in centroid.vector.iter_mut().zip(vector.iter()) {
                        *slot = (*slot * count_f - value) / (count_f - 1.0);
                    }
                }
                centroid.vector_count = count - 1;
                centroid.updated_at = now;
            }
        }
    }

    // -- re-clustering --

    /// Offline batch re-clustering: Lloyd's algorithm over the supplied
    /// corpus, then a full reassignment of every vector in it.
    ///
    /// While the run is in flight, concurrent `assign`/`reassign` calls
    /// fail with [`ClusterError::Busy`]; readers keep observing the
    /// pre-recluster snapshot until the swap.
    ///
    /// # Errors
    ///
    /// [`ClusterError::Busy`] when a run is already in flight,
    /// [`ClusterError::InsufficientSeeds`] with fewer vectors than
    /// clusters, plus dimension/norm validation failures.
    pub async fn recluster(
        &self,
        all_vectors: &[(String, Vector)],
    ) -> Result<ReclusterOutcome, ClusterError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        for (_, vector) in all_vectors {
            self.check_vector(vector)?;
        }
        let k = self.config.num_clusters;
        if all_vectors.len() < k {
            return Err(ClusterError::InsufficientSeeds {
                needed: k,
                got: all_vectors.len(),
            });
        }

        // Compute off-lock: readers and the old snapshot stay live.
        let corpus: Vec<Vector> = all_vectors.iter().map(|(_, v)| v.clone()).collect();
        let mut rng = rand::rng();
        let outcome = kmeans::lloyd(
            &corpus,
            k,
            self.config.max_iterations,
            self.config.tolerance,
            &mut rng,
        );

        let now = self.clock.now_millis();
        let cluster_ids: Vec<String> = (0..k).map(|index| format!("c{index}")).collect();

        // Full reassignment under the configured metric.
        let mut assignments: BTreeMap<String, AssignedVector> = BTreeMap::new();
        let mut sums: Vec<Vector> = vec![vec![0.0; self.config.dimension]; k];
        let mut counts: Vec<u64> = vec![0; k];
        for (vector_id, vector) in all_vectors {
            let (index, d) = outcome
                .centroids
                .iter()
                .enumerate()
                .map(|(index, centroid)| {
                    let d =
                        distance(self.config.metric, vector, centroid).unwrap_or(f32::INFINITY);
                    (index, d)
                })
                .min_by_key(|(index, d)| (OrderedFloat(*d), cluster_ids[*index].clone()))
                .ok_or(ClusterError::NotInitialised)?;

            counts[index] += 1;
            for (slot, value) in sums[index].iter_mut().zip(vector.iter()) {
                *slot += value;
            }
            assignments.insert(
                vector_id.clone(),
                AssignedVector {
                    assignment: ClusterAssignment {
                        vector_id: vector_id.clone(),
                        cluster_id: cluster_ids[index].clone(),
                        distance: d,
                        assigned_at: now,
                    },
                    vector: vector.clone(),
                },
            );
        }

        // Centroid = arithmetic mean of members; empty clusters keep the
        // Lloyd position.
        let mut centroids = BTreeMap::new();
        for (index, cluster_id) in cluster_ids.iter().enumerate() {
            let vector = if counts[index] == 0 {
                outcome.centroids[index].clone()
            } else {
                #[allow(clippy::cast_precision_loss)]
                let count = counts[index] as f32;
                sums[index].iter().map(|sum| sum / count).collect()
            };
            centroids.insert(
                cluster_id.clone(),
                Centroid {
                    cluster_id: cluster_id.clone(),
                    dimension: self.config.dimension,
                    vector,
                    vector_count: counts[index],
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        {
            let mut state = self.state.write();
            state.centroids = centroids;
            state.assignments = assignments;
            self.bump_version();
        }

        let total_vectors = all_vectors.len() as u64;
        self.emit(
            MANAGER_STREAM,
            "reclustered",
            serde_json::json!({
                "clusterCount": k,
                "totalVectors": total_vectors,
                "iterations": outcome.iterations,
                "converged": outcome.converged,
            }),
        )
        .await;

        Ok(ReclusterOutcome {
            iterations: outcome.iterations,
            converged: outcome.converged,
            total_vectors,
        })
    }
}

impl ClusterRouter for ClusterManager {
    fn cluster_index(&self) -> Arc<ClusterIndex> {
        let current = self.version.load(Ordering::SeqCst);
        let published = self.published.load_full();
        if published.version == current {
            return published;
        }
        let fresh = Arc::new(self.build_index());
        self.published.store(fresh.clone());
        fresh
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use terrace_core::ManualClock;

    use super::*;

    fn config(k: usize, dimension: usize) -> ClusterConfig {
        ClusterConfig {
            metric: DistanceMetric::Euclidean,
            ..ClusterConfig::new(k, dimension)
        }
    }

    fn make_manager(k: usize, dimension: usize) -> ClusterManager {
        ClusterManager::with_parts(config(k, dimension), None, Arc::new(ManualClock::new(1_000)))
    }

    async fn initialised_two_cluster_manager() -> ClusterManager {
        let manager = make_manager(2, 2);
        manager
            .initialise_centroids(&[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        manager
    }

    // -- bootstrap --

    #[tokio::test]
    async fn initialise_requires_enough_seeds() {
        let manager = make_manager(3, 2);
        let err = manager
            .initialise_centroids(&[vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert_eq!(err, ClusterError::InsufficientSeeds { needed: 3, got: 1 });
    }

    #[tokio::test]
    async fn initialise_twice_is_rejected() {
        let manager = initialised_two_cluster_manager().await;
        let err = manager
            .initialise_centroids(&[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap_err();
        assert_eq!(err, ClusterError::AlreadyInitialised);
    }

    #[tokio::test]
    async fn initialise_validates_dimension() {
        let manager = make_manager(1, 3);
        let err = manager
            .initialise_centroids(&[vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn cosine_metric_enforces_unit_norm() {
        let manager = ClusterManager::new(ClusterConfig::new(1, 2));
        let err = manager
            .initialise_centroids(&[vec![3.0, 4.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotUnitVector { .. }));

        manager
            .initialise_centroids(&[vec![1.0, 0.0]])
            .await
            .unwrap();
        let err = manager.assign("v1", vec![0.5, 0.5]).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotUnitVector { .. }));
    }

    // -- nearest / assign --

    #[tokio::test]
    async fn nearest_clusters_sorted_with_id_tie_break() {
        let manager = initialised_two_cluster_manager().await;

        // Equidistant from both centroids: ids break the tie.
        let ranked = manager.nearest_clusters(&[0.0, 0.0], 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "c0");
        assert_eq!(ranked[1].0, "c1");
        assert!((ranked[0].1 - ranked[1].1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn nearest_clusters_before_init_fails() {
        let manager = make_manager(1, 2);
        let err = manager.nearest_clusters(&[0.0, 0.0], 1).unwrap_err();
        assert_eq!(err, ClusterError::NotInitialised);
    }

    #[tokio::test]
    async fn assign_picks_nearest_and_updates_centroid() {
        let manager = initialised_two_cluster_manager().await;
        // Centroid set is {[1,0], [0,1]} in some id order; find the id
        // nearest to the x axis.
        let nearest_to_x = manager.nearest_clusters(&[1.0, 0.0], 1).unwrap()[0]
            .0
            .clone();

        let assignment = manager.assign("v1", vec![0.8, 0.0]).await.unwrap();
        assert_eq!(assignment.cluster_id, nearest_to_x);

        // First member: the centroid mean moves to the member itself.
        let index = manager.snapshot();
        let info = index
            .clusters
            .iter()
            .find(|c| c.cluster_id == nearest_to_x)
            .unwrap();
        assert_eq!(info.vector_count, 1);
        assert!((info.centroid[0] - 0.8).abs() < 1e-6);
        assert!(info.centroid[1].abs() < 1e-6);

        // Second member folds into the running mean.
        manager.assign("v2", vec![0.6, 0.0]).await.unwrap();
        let index = manager.snapshot();
        let info = index
            .clusters
            .iter()
            .find(|c| c.cluster_id == nearest_to_x)
            .unwrap();
        assert_eq!(info.vector_count, 2);
        assert!((info.centroid[0] - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn incremental_updates_disabled_freezes_centroid() {
        let manager = ClusterManager::with_parts(
            ClusterConfig {
                enable_incremental_updates: false,
                ..config(1, 2)
            },
            None,
            Arc::new(ManualClock::new(0)),
        );
        manager
            .initialise_centroids(&[vec![1.0, 0.0]])
            .await
            .unwrap();

        manager.assign("v1", vec![0.0, 5.0]).await.unwrap();
        let index = manager.snapshot();
        assert_eq!(index.clusters[0].centroid, vec![1.0, 0.0]);
        assert_eq!(index.clusters[0].vector_count, 1);
    }

    #[tokio::test]
    async fn assign_existing_id_keeps_single_assignment() {
        let manager = initialised_two_cluster_manager().await;
        manager.assign("v1", vec![0.9, 0.0]).await.unwrap();
        manager.assign("v1", vec![0.0, 0.9]).await.unwrap();

        assert_eq!(manager.assigned_count(), 1);
        let index = manager.snapshot();
        assert_eq!(index.total_vectors, 1);
    }

    #[tokio::test]
    async fn assign_batch_folds_in_order() {
        let sequential = initialised_two_cluster_manager().await;
        sequential.assign("a", vec![0.9, 0.0]).await.unwrap();
        sequential.assign("b", vec![0.7, 0.0]).await.unwrap();

        let batched = initialised_two_cluster_manager().await;
        let assignments = batched
            .assign_batch(vec![
                ("a".to_string(), vec![0.9, 0.0]),
                ("b".to_string(), vec![0.7, 0.0]),
            ])
            .await
            .unwrap();

        assert_eq!(assignments.len(), 2);
        // Same corpus, same fold order: identical centroid positions.
        let left = sequential.snapshot();
        let right = batched.snapshot();
        for (a, b) in left.clusters.iter().zip(right.clusters.iter()) {
            assert_eq!(a.vector_count, b.vector_count);
            assert_eq!(a.centroid, b.centroid);
        }
    }

    // -- reassign / unassign --

    #[tokio::test]
    async fn reassign_unknown_vector_fails() {
        let manager = initialised_two_cluster_manager().await;
        let err = manager.reassign("ghost", vec![1.0, 0.0]).await.unwrap_err();
        assert_eq!(err, ClusterError::UnknownVector("ghost".to_string()));
    }

    #[tokio::test]
    async fn reassign_moves_mass_between_clusters() {
        let manager = initialised_two_cluster_manager().await;
        let first = manager.assign("v1", vec![0.9, 0.0]).await.unwrap();
        let second = manager.reassign("v1", vec![0.0, 0.9]).await.unwrap();
        assert_ne!(first.cluster_id, second.cluster_id);

        let index = manager.snapshot();
        assert_eq!(index.total_vectors, 1);
        let old = index
            .clusters
            .iter()
            .find(|c| c.cluster_id == first.cluster_id)
            .unwrap();
        assert_eq!(old.vector_count, 0);
    }

    #[tokio::test]
    async fn assign_then_reassign_same_vector_is_stable() {
        let manager = initialised_two_cluster_manager().await;
        let first = manager.assign("v1", vec![0.9, 0.0]).await.unwrap();
        let second = manager.reassign("v1", vec![0.9, 0.0]).await.unwrap();

        assert_eq!(first.cluster_id, second.cluster_id);
        assert_eq!(manager.assigned_count(), 1);
        let index = manager.snapshot();
        assert_eq!(index.total_vectors, 1);
    }

    #[tokio::test]
    async fn unassign_removes_and_decrements() {
        let manager = initialised_two_cluster_manager().await;
        let assignment = manager.assign("v1", vec![0.9, 0.0]).await.unwrap();

        let removed = manager.unassign("v1").await.unwrap().unwrap();
        assert_eq!(removed.cluster_id, assignment.cluster_id);
        assert_eq!(manager.assigned_count(), 0);
        assert_eq!(manager.snapshot().total_vectors, 0);

        assert!(manager.unassign("v1").await.unwrap().is_none());
    }

    // -- stats --

    #[tokio::test]
    async fn stats_recomputed_from_assignments() {
        let manager = initialised_two_cluster_manager().await;
        let target = manager.assign("v1", vec![0.9, 0.0]).await.unwrap();
        manager.assign("v2", vec![0.8, 0.0]).await.unwrap();

        let stats = manager.stats(&target.cluster_id).unwrap();
        assert_eq!(stats.vector_count, 2);
        assert!(stats.min_distance <= stats.average_distance);
        assert!(stats.average_distance <= stats.max_distance);
    }

    #[tokio::test]
    async fn stats_unknown_cluster_fails() {
        let manager = initialised_two_cluster_manager().await;
        let err = manager.stats("c99").unwrap_err();
        assert_eq!(err, ClusterError::UnknownCluster("c99".to_string()));
    }

    // -- snapshot / router --

    #[tokio::test]
    async fn snapshot_is_copy_on_write() {
        let manager = initialised_two_cluster_manager().await;
        let before = manager.cluster_index();
        let before_version = before.version;

        manager.assign("v1", vec![0.9, 0.0]).await.unwrap();

        // The old snapshot is untouched; a fresh load sees the mutation.
        assert_eq!(before.version, before_version);
        assert_eq!(before.total_vectors, 0);
        let after = manager.cluster_index();
        assert!(after.version > before_version);
        assert_eq!(after.total_vectors, 1);
    }

    #[tokio::test]
    async fn snapshot_clusters_sorted_with_partition_keys() {
        let manager = make_manager(3, 2);
        manager
            .initialise_centroids(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]])
            .await
            .unwrap();

        let index = manager.snapshot();
        let ids: Vec<&str> = index.clusters.iter().map(|c| c.cluster_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
        assert_eq!(index.clusters[0].partition_key, "clusters/c0.parquet");
    }

    // -- busy discipline --

    #[tokio::test]
    async fn mutations_fail_fast_while_busy() {
        let manager = initialised_two_cluster_manager().await;
        manager.busy.store(true, Ordering::SeqCst);

        assert_eq!(
            manager.assign("v1", vec![1.0, 0.0]).await.unwrap_err(),
            ClusterError::Busy
        );
        assert_eq!(
            manager.reassign("v1", vec![1.0, 0.0]).await.unwrap_err(),
            ClusterError::Busy
        );
        assert_eq!(
            manager.recluster(&[]).await.unwrap_err(),
            ClusterError::Busy
        );

        manager.busy.store(false, Ordering::SeqCst);
        // Reads were never blocked.
        assert_eq!(manager.nearest_clusters(&[0.0, 0.0], 1).unwrap().len(), 1);
    }

    // -- recluster --

    #[tokio::test]
    async fn recluster_reassigns_whole_corpus() {
        let manager = make_manager(2, 2);
        manager
            .initialise_centroids(&[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();

        let corpus: Vec<(String, Vector)> = (0..10)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let jitter = (i as f32) * 0.01;
                if i % 2 == 0 {
                    (format!("x{i}"), vec![1.0 + jitter, 0.0])
                } else {
                    (format!("y{i}"), vec![0.0, 1.0 + jitter])
                }
            })
            .collect();

        let outcome = manager.recluster(&corpus).await.unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.total_vectors, 10);

        // Exactly one assignment per vector, counts add up.
        assert_eq!(manager.assigned_count(), 10);
        let index = manager.snapshot();
        assert_eq!(index.total_vectors, 10);
        assert_eq!(index.cluster_count, 2);

        // The two blobs land in different clusters.
        let x_cluster = manager.assignment("x0").unwrap().cluster_id;
        let y_cluster = manager.assignment("y1").unwrap().cluster_id;
        assert_ne!(x_cluster, y_cluster);

        // Busy flag is released; mutations work again.
        manager.assign("fresh", vec![1.0, 0.0]).await.unwrap();
    }

    #[tokio::test]
    async fn recluster_with_too_few_vectors_fails_and_releases_busy() {
        let manager = initialised_two_cluster_manager().await;
        let err = manager
            .recluster(&[("only".to_string(), vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err, ClusterError::InsufficientSeeds { needed: 2, got: 1 });

        // The guard released the flag on the error path.
        manager.assign("v1", vec![1.0, 0.0]).await.unwrap();
    }

    // -- events --

    #[tokio::test]
    async fn assign_emits_cluster_assignment_event() {
        use crate::events::{EventStore, InMemoryEventStorage, ReadStreamOptions};

        let store = Arc::new(EventStore::new(Arc::new(InMemoryEventStorage::new())));
        let manager = ClusterManager::with_parts(
            config(1, 2),
            Some(store.clone()),
            Arc::new(ManualClock::new(1_000)),
        );
        manager
            .initialise_centroids(&[vec![1.0, 0.0]])
            .await
            .unwrap();
        manager.assign("v1", vec![0.5, 0.5]).await.unwrap();

        let events = store
            .read_stream("cluster-c0", &ReadStreamOptions::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "vector_assigned");
        assert_eq!(events[0].payload["vectorId"], "v1");
        assert_eq!(events[0].payload["clusterId"], "c0");
    }
}
