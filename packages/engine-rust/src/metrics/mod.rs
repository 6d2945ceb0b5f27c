//! Metrics emission and scoped error boundaries.
//!
//! [`MetricsHub`] fronts the `metrics` facade: a configurable prefix and a
//! default tag set are merged into every emission, and timers hand back a
//! handle that records on `stop()` or discards on `cancel()`.
//! [`ErrorBoundary`] wraps fallible operations with bounded retries, a
//! fallback, and error-state tracking; retries are used on the migration
//! and ingest paths only, never inside the synchronous read path.

use std::time::Instant;

use metrics::Label;

mod boundary;

pub use boundary::{BoundaryStats, ErrorBoundary, ErrorBoundaryConfig};

/// A tag attached to an emission.
pub type Tag = (String, String);

/// Prefixed, default-tagged front over the `metrics` facade.
#[derive(Debug, Clone, Default)]
pub struct MetricsHub {
    prefix: Option<String>,
    default_tags: Vec<Tag>,
}

impl MetricsHub {
    /// A hub with no prefix and no default tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub whose emissions are named `{prefix}.{name}`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            default_tags: Vec::new(),
        }
    }

    /// Adds a tag merged into every emission.
    #[must_use]
    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.push((key.into(), value.into()));
        self
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    fn labels(&self, tags: &[Tag]) -> Vec<Label> {
        self.default_tags
            .iter()
            .chain(tags.iter())
            .map(|(key, value)| Label::new(key.clone(), value.clone()))
            .collect()
    }

    /// Increments a counter.
    pub fn counter(&self, name: &str, value: u64, tags: &[Tag]) {
        metrics::counter!(self.full_name(name), self.labels(tags)).increment(value);
    }

    /// Sets a gauge.
    pub fn gauge(&self, name: &str, value: f64, tags: &[Tag]) {
        metrics::gauge!(self.full_name(name), self.labels(tags)).set(value);
    }

    /// Records one histogram observation.
    pub fn histogram(&self, name: &str, value: f64, tags: &[Tag]) {
        metrics::histogram!(self.full_name(name), self.labels(tags)).record(value);
    }

    /// Records one summary observation.
    ///
    /// The `metrics` facade models summaries as histograms; exporters decide
    /// the aggregation.
    pub fn summary(&self, name: &str, value: f64, tags: &[Tag]) {
        metrics::histogram!(self.full_name(name), self.labels(tags)).record(value);
    }

    /// Starts a timer whose duration lands in the named histogram.
    #[must_use]
    pub fn timer(&self, name: &str, tags: &[Tag]) -> TimerHandle {
        TimerHandle {
            hub: self.clone(),
            name: name.to_string(),
            tags: tags.to_vec(),
            started: Instant::now(),
        }
    }
}

/// Running timer; record with [`stop`](TimerHandle::stop) or discard with
/// [`cancel`](TimerHandle::cancel).
#[derive(Debug)]
pub struct TimerHandle {
    hub: MetricsHub,
    name: String,
    tags: Vec<Tag>,
    started: Instant,
}

impl TimerHandle {
    /// Records the elapsed milliseconds and returns them.
    #[allow(clippy::must_use_candidate)]
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1_000.0;
        self.hub.histogram(&self.name, elapsed_ms, &self.tags);
        elapsed_ms
    }

    /// Discards the timer without recording.
    pub fn cancel(self) {
        // Dropping without emitting is the whole contract.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
