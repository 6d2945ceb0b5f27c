//! Named error boundaries with bounded retries and fallbacks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use terrace_core::{Clock, SystemClock};

use super::MetricsHub;

/// Window over which the errors-per-minute rate is computed.
const RATE_WINDOW_MS: i64 = 60_000;

/// Configuration for one [`ErrorBoundary`].
#[derive(Debug, Clone)]
pub struct ErrorBoundaryConfig {
    /// Human-readable boundary name, tagged onto every emission.
    pub name: String,
    /// Retries after the first attempt; 0 means try once.
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl ErrorBoundaryConfig {
    /// A no-retry boundary with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: 0,
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

/// Point-in-time counters for one boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryStats {
    pub error_count: u64,
    pub fallback_count: u64,
    pub recovery_count: u64,
    pub last_error_at: Option<i64>,
    /// Errors observed in the trailing minute.
    pub error_rate_per_minute: f64,
}

#[derive(Debug, Default)]
struct BoundaryState {
    error_count: u64,
    fallback_count: u64,
    recovery_count: u64,
    last_error_at: Option<i64>,
    error_times: VecDeque<i64>,
    in_error_state: bool,
}

/// Scoped error capture around a fallible async operation.
///
/// A boundary is "in error state" from a failed operation until the next
/// success (which counts as a recovery) or an explicit
/// [`clear_error_state`](ErrorBoundary::clear_error_state).
pub struct ErrorBoundary {
    config: ErrorBoundaryConfig,
    hub: MetricsHub,
    clock: Arc<dyn Clock>,
    on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    state: Mutex<BoundaryState>,
}

impl std::fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("name", &self.config.name)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

impl ErrorBoundary {
    /// Creates a boundary emitting through the given hub.
    #[must_use]
    pub fn new(config: ErrorBoundaryConfig, hub: MetricsHub) -> Self {
        Self::with_clock(config, hub, Arc::new(SystemClock))
    }

    /// Creates a boundary with an injected clock (deterministic tests).
    #[must_use]
    pub fn with_clock(config: ErrorBoundaryConfig, hub: MetricsHub, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            hub,
            clock,
            on_error: None,
            state: Mutex::new(BoundaryState::default()),
        }
    }

    /// Installs an observer invoked with each error's display form.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_error = Some(observer);
        self
    }

    /// The boundary's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Runs `op`, retrying up to `max_retries` times with `retry_delay`
    /// between attempts. Returns the last error when all attempts fail.
    ///
    /// # Errors
    ///
    /// The operation's own error type, after the retry budget is spent.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    self.record_error(&err);
                    if attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::debug!(
                        boundary = %self.config.name,
                        attempt,
                        error = %err,
                        "retrying after error"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Runs `op` under the retry budget and degrades to `fallback` when all
    /// attempts fail.
    pub async fn run_with_fallback<T, E, F, Fut, FB>(&self, op: F, fallback: FB) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        FB: FnOnce(E) -> T,
    {
        match self.run(op).await {
            Ok(value) => value,
            Err(err) => {
                {
                    let mut state = self.state.lock();
                    state.fallback_count += 1;
                }
                self.hub.counter(
                    "boundary.fallbacks",
                    1,
                    &[("boundary".to_string(), self.config.name.clone())],
                );
                fallback(err)
            }
        }
    }

    /// Whether the last operation failed with no success since.
    #[must_use]
    pub fn is_in_error_state(&self) -> bool {
        self.state.lock().in_error_state
    }

    /// Clears the error state without recording a recovery.
    pub fn clear_error_state(&self) {
        self.state.lock().in_error_state = false;
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BoundaryStats {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        prune_window(&mut state.error_times, now);
        #[allow(clippy::cast_precision_loss)]
        let error_rate_per_minute = state.error_times.len() as f64;
        BoundaryStats {
            error_count: state.error_count,
            fallback_count: state.fallback_count,
            recovery_count: state.recovery_count,
            last_error_at: state.last_error_at,
            error_rate_per_minute,
        }
    }

    fn record_success(&self) {
        let recovered = {
            let mut state = self.state.lock();
            let recovered = state.in_error_state;
            if recovered {
                state.recovery_count += 1;
            }
            state.in_error_state = false;
            recovered
        };
        if recovered {
            self.hub.counter(
                "boundary.recoveries",
                1,
                &[("boundary".to_string(), self.config.name.clone())],
            );
        }
    }

    fn record_error<E: std::fmt::Display>(&self, err: &E) {
        let now = self.clock.now_millis();
        {
            let mut state = self.state.lock();
            state.error_count += 1;
            state.last_error_at = Some(now);
            state.in_error_state = true;
            state.error_times.push_back(now);
            prune_window(&mut state.error_times, now);
        }
        self.hub.counter(
            "boundary.errors",
            1,
            &[("boundary".to_string(), self.config.name.clone())],
        );
        if let Some(observer) = &self.on_error {
            observer(&err.to_string());
        }
    }
}

fn prune_window(times: &mut VecDeque<i64>, now: i64) {
    while let Some(front) = times.front() {
        if now - front > RATE_WINDOW_MS {
            times.pop_front();
        } else {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
