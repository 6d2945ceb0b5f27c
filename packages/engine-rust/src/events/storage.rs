//! Storage backend seam for the event store.
//!
//! [`EventStorage`] is the innermost layer: dumb, synchronous row storage
//! per stream. The [`EventStore`](super::EventStore) above it owns the
//! per-stream ordering discipline and the optimistic-concurrency check, so
//! backends only need ordered append and ranged read.

use dashmap::DashMap;

use super::EventStoreError;

/// One stored event row: payload and metadata in serialized string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEventRecord {
    pub id: String,
    pub stream_id: String,
    pub event_type: String,
    pub version: u64,
    /// Payload in the serializer's string form.
    pub payload: String,
    pub timestamp: i64,
    /// Metadata in the serializer's string form, when present.
    pub metadata: Option<String>,
}

/// Low-level per-stream row storage.
///
/// Rows arrive already versioned and in order; implementations append and
/// read, nothing more. Wrapped in `Arc<dyn EventStorage>` for sharing
/// across async boundaries.
pub trait EventStorage: Send + Sync + 'static {
    /// Appends rows to the given stream's log, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] on I/O failure.
    fn append_rows(
        &self,
        stream_id: &str,
        rows: Vec<StoredEventRecord>,
    ) -> Result<(), EventStoreError>;

    /// Reads all rows of a stream in ascending version order.
    ///
    /// An absent stream reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] on I/O failure.
    fn read_rows(&self, stream_id: &str) -> Result<Vec<StoredEventRecord>, EventStoreError>;

    /// The highest stored version of a stream, 0 when absent.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] on I/O failure.
    fn current_version(&self, stream_id: &str) -> Result<u64, EventStoreError>;
}

/// In-memory backend: one `Vec` of rows per stream behind a [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryEventStorage {
    streams: DashMap<String, Vec<StoredEventRecord>>,
}

impl InMemoryEventStorage {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Number of known streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl EventStorage for InMemoryEventStorage {
    fn append_rows(
        &self,
        stream_id: &str,
        rows: Vec<StoredEventRecord>,
    ) -> Result<(), EventStoreError> {
        self.streams
            .entry(stream_id.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    fn read_rows(&self, stream_id: &str) -> Result<Vec<StoredEventRecord>, EventStoreError> {
        Ok(self
            .streams
            .get(stream_id)
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    fn current_version(&self, stream_id: &str) -> Result<u64, EventStoreError> {
        Ok(self
            .streams
            .get(stream_id)
            .and_then(|rows| rows.last().map(|row| row.version))
            .unwrap_or(0))
    }
}
