//! The event store proper: optimistic-concurrency append over a storage
//! backend.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dashmap::DashMap;
use terrace_core::{Clock, IdGenerator, SystemClock, UuidIdGenerator};

use super::serializer::{EventSerializer, JsonEventSerializer};
use super::storage::{EventStorage, StoredEventRecord};
use super::{
    AppendEventInput, EventMetadata, EventSink, EventStoreError, ReadStreamOptions, StreamEvent,
};

/// Result of a single append: the stored event plus the stream's new head.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub event: StreamEvent,
    pub current_version: u64,
}

/// Result of a batch append.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAppendOutcome {
    pub events: Vec<StreamEvent>,
    pub current_version: u64,
}

/// Per-stream ordered, versioned, optimistically concurrent event log.
///
/// Appends to one stream are serialised through a per-stream mutex, so the
/// expected-version check and the row write are atomic: concurrent
/// appenders race through the check and exactly one wins at each version.
/// Reads go straight to the backend.
pub struct EventStore {
    storage: Arc<dyn EventStorage>,
    serializer: Arc<dyn EventSerializer>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    stream_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("streams_locked", &self.stream_locks.len())
            .finish_non_exhaustive()
    }
}

impl EventStore {
    /// Creates a store with the default JSON serializer, system clock, and
    /// UUID id generator.
    #[must_use]
    pub fn new(storage: Arc<dyn EventStorage>) -> Self {
        Self::with_parts(
            storage,
            Arc::new(JsonEventSerializer),
            Arc::new(SystemClock),
            Arc::new(UuidIdGenerator),
        )
    }

    /// Creates a store with every seam injected.
    #[must_use]
    pub fn with_parts(
        storage: Arc<dyn EventStorage>,
        serializer: Arc<dyn EventSerializer>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            storage,
            serializer,
            clock,
            ids,
            stream_locks: DashMap::new(),
        }
    }

    fn stream_lock(&self, stream_id: &str) -> Arc<Mutex<()>> {
        self.stream_locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends one event.
    ///
    /// With `expected_version` set, fails when the stream head differs;
    /// otherwise appends at `current + 1` unconditionally.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::ConcurrencyConflict`] on a stale expected version,
    /// [`EventStoreError::Serializer`] for unencodable payloads,
    /// [`EventStoreError::Storage`] on backend failure.
    pub async fn append(
        &self,
        stream_id: &str,
        input: AppendEventInput,
        expected_version: Option<u64>,
    ) -> Result<AppendOutcome, EventStoreError> {
        let mut outcome = self
            .append_many(stream_id, vec![input], expected_version)
            .await?;
        // One input in, exactly one event out.
        let event = outcome.events.pop().ok_or_else(|| {
            EventStoreError::Storage("append produced no event".to_string())
        })?;
        Ok(AppendOutcome {
            event,
            current_version: outcome.current_version,
        })
    }

    /// Appends a batch, all-or-nothing: on conflict or serializer failure
    /// no event is appended. Events take consecutive versions in array
    /// order.
    ///
    /// # Errors
    ///
    /// As [`EventStore::append`].
    pub async fn append_batch(
        &self,
        stream_id: &str,
        inputs: Vec<AppendEventInput>,
        expected_version: Option<u64>,
    ) -> Result<BatchAppendOutcome, EventStoreError> {
        self.append_many(stream_id, inputs, expected_version).await
    }

    async fn append_many(
        &self,
        stream_id: &str,
        inputs: Vec<AppendEventInput>,
        expected_version: Option<u64>,
    ) -> Result<BatchAppendOutcome, EventStoreError> {
        let lock = self.stream_lock(stream_id);
        let _guard = lock.lock();

        let current = self.storage.current_version(stream_id)?;
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id: stream_id.to_string(),
                    expected,
                    actual: current,
                });
            }
        }

        // Serialize everything before touching storage so a failure in any
        // input leaves the stream unchanged.
        let mut rows = Vec::with_capacity(inputs.len());
        let mut events = Vec::with_capacity(inputs.len());
        for (offset, input) in inputs.into_iter().enumerate() {
            let version = current + 1 + offset as u64;
            let payload_raw = self.serializer.serialize(&input.payload)?;
            let metadata_raw = match &input.metadata {
                Some(metadata) => {
                    let value = serde_json::to_value(metadata)
                        .map_err(|err| EventStoreError::Serializer(err.to_string()))?;
                    Some(self.serializer.serialize(&value)?)
                }
                None => None,
            };

            let event = StreamEvent {
                id: self.ids.next_id(),
                stream_id: stream_id.to_string(),
                event_type: input.event_type,
                version,
                payload: input.payload,
                timestamp: self.clock.now_millis(),
                metadata: input.metadata,
            };

            rows.push(StoredEventRecord {
                id: event.id.clone(),
                stream_id: event.stream_id.clone(),
                event_type: event.event_type.clone(),
                version,
                payload: payload_raw,
                timestamp: event.timestamp,
                metadata: metadata_raw,
            });
            events.push(event);
        }

        let current_version = current + events.len() as u64;
        self.storage.append_rows(stream_id, rows)?;

        Ok(BatchAppendOutcome {
            events,
            current_version,
        })
    }

    /// Reads a stream slice; bounds are inclusive.
    ///
    /// Returns events in non-decreasing version order, or strictly
    /// decreasing with `options.reverse`. `limit` applies after ordering.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::Storage`] on backend failure,
    /// [`EventStoreError::Serializer`] for undecodable stored payloads.
    pub async fn read_stream(
        &self,
        stream_id: &str,
        options: &ReadStreamOptions,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        let rows = self.storage.read_rows(stream_id)?;

        let mut events = Vec::new();
        for row in rows {
            if row.version < options.from_version {
                continue;
            }
            if let Some(to) = options.to_version {
                if row.version > to {
                    continue;
                }
            }
            events.push(self.hydrate(row)?);
        }

        if options.reverse {
            events.reverse();
        }
        if let Some(limit) = options.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// The stream's head version, 0 when no events exist.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::Storage`] on backend failure.
    pub async fn get_stream_version(&self, stream_id: &str) -> Result<u64, EventStoreError> {
        self.storage.current_version(stream_id)
    }

    /// Whether the stream has at least one event.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::Storage`] on backend failure.
    pub async fn stream_exists(&self, stream_id: &str) -> Result<bool, EventStoreError> {
        Ok(self.storage.current_version(stream_id)? > 0)
    }

    fn hydrate(&self, row: StoredEventRecord) -> Result<StreamEvent, EventStoreError> {
        let payload = self.serializer.deserialize(&row.payload)?;
        let metadata = match row.metadata {
            Some(raw) => {
                let value = self.serializer.deserialize(&raw)?;
                let metadata: EventMetadata = serde_json::from_value(value)
                    .map_err(|err| EventStoreError::Serializer(err.to_string()))?;
                Some(metadata)
            }
            None => None,
        };
        Ok(StreamEvent {
            id: row.id,
            stream_id: row.stream_id,
            event_type: row.event_type,
            version: row.version,
            payload,
            timestamp: row.timestamp,
            metadata,
        })
    }
}

#[async_trait]
impl EventSink for EventStore {
    async fn emit(
        &self,
        stream_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), EventStoreError> {
        self.append(stream_id, AppendEventInput::new(event_type, payload), None)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
