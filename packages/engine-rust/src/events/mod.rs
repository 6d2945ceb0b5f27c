//! Stream-based event store: per-stream monotonic append logs with
//! optimistic concurrency.
//!
//! Cluster assignments and tier migrations record their state changes here.
//! Each stream's versions form the gapless sequence 1..N; concurrent
//! appenders race through the expected-version check and exactly one wins
//! at each version. Payload serialization is pluggable ([`EventSerializer`],
//! JSON by default), as are the id generator and clock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod serializer;
mod storage;
mod store;

pub use serializer::{EventSerializer, JsonEventSerializer};
pub use storage::{EventStorage, InMemoryEventStorage, StoredEventRecord};
pub use store::{AppendOutcome, BatchAppendOutcome, EventStore};

/// Error kinds surfaced by the event store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    /// The caller's `expected_version` is stale. Never retried internally.
    #[error(
        "concurrency conflict on stream '{stream_id}': expected version {expected}, current {actual}"
    )]
    ConcurrencyConflict {
        stream_id: String,
        expected: u64,
        actual: u64,
    },

    /// Payload or metadata could not be (de)serialized.
    #[error("event serialization failed: {0}")]
    Serializer(String),

    /// Underlying storage I/O failure; retryable by the caller.
    #[error("event storage failure: {0}")]
    Storage(String),
}

/// Optional causation/correlation metadata attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub causation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
}

/// One event as read back from a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Generated event id (UUID v4 by default).
    pub id: String,
    /// The logical aggregate this event belongs to.
    pub stream_id: String,
    /// Event-type tag.
    pub event_type: String,
    /// Monotonic version within the stream; the first event is 1.
    pub version: u64,
    /// Deserialized payload.
    pub payload: serde_json::Value,
    /// Append time, unix milliseconds.
    pub timestamp: i64,
    /// Optional causation metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<EventMetadata>,
}

/// Input for a single event in an append call.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendEventInput {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Option<EventMetadata>,
}

impl AppendEventInput {
    /// Creates an input with the given type and payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: None,
        }
    }

    /// Surface-convenience alias: some writers call the payload `data`.
    #[must_use]
    pub fn with_data(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(event_type, data)
    }

    /// Attaches causation metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Options for [`EventStore::read_stream`]. Version bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// First version to return.
    pub from_version: u64,
    /// Last version to return; `None` reads to the head.
    pub to_version: Option<u64>,
    /// Maximum events to return, applied after ordering.
    pub limit: Option<usize>,
    /// Return events in strictly decreasing version order.
    pub reverse: bool,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            from_version: 1,
            to_version: None,
            limit: None,
            reverse: false,
        }
    }
}

/// Append-only sink for domain events.
///
/// The seam the cluster manager and migration engine write through; the
/// full [`EventStore`] implements it by appending without a version check.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Appends one event to `stream_id`.
    async fn emit(
        &self,
        stream_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), EventStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_input_data_alias_is_payload() {
        let payload = serde_json::json!({"clusterId": "c0"});
        let via_payload = AppendEventInput::new("assigned", payload.clone());
        let via_data = AppendEventInput::with_data("assigned", payload);
        assert_eq!(via_payload, via_data);
    }

    #[test]
    fn read_options_default_from_first_version() {
        let opts = ReadStreamOptions::default();
        assert_eq!(opts.from_version, 1);
        assert_eq!(opts.to_version, None);
        assert!(!opts.reverse);
    }

    #[test]
    fn event_metadata_omits_empty_fields() {
        let json = serde_json::to_value(EventMetadata::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
