//! Pluggable payload serialization.
//!
//! The store persists payloads and metadata as strings produced by an
//! [`EventSerializer`]. The default is JSON; any bidirectional
//! string-to-value codec can be swapped in at construction.

use super::EventStoreError;

/// Bidirectional string/value codec for event payloads.
///
/// Implementations must round-trip byte-identically for the payload types
/// writers use: `deserialize(serialize(v)) == v`.
pub trait EventSerializer: Send + Sync {
    /// Encodes a payload value to its stored string form.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Serializer`] when the value cannot be
    /// encoded.
    fn serialize(&self, value: &serde_json::Value) -> Result<String, EventStoreError>;

    /// Decodes a stored string back into the payload value.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Serializer`] for undecodable input.
    fn deserialize(&self, raw: &str) -> Result<serde_json::Value, EventStoreError>;
}

/// Default serializer: compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<String, EventStoreError> {
        serde_json::to_string(value).map_err(|err| EventStoreError::Serializer(err.to_string()))
    }

    fn deserialize(&self, raw: &str) -> Result<serde_json::Value, EventStoreError> {
        serde_json::from_str(raw).map_err(|err| EventStoreError::Serializer(err.to_string()))
    }
}
