//! Identifier generation behind an injectable seam.
//!
//! Event ids default to UUID v4; tests swap in [`SequentialIdGenerator`] for
//! reproducible output.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Generator for opaque string identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produces the next identifier.
    fn next_id(&self) -> String;
}

/// Default generator producing UUID v4 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic generator producing `{prefix}-1`, `{prefix}-2`, ...
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator with the given prefix, starting at 1.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.prefix)
    }
}
