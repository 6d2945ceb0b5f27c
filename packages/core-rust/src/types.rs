//! Core data model for the vector search engine.
//!
//! These types define the unit of storage ([`VectorEntry`]), the graph node
//! it is derived from ([`Thing`]), and the metadata that travels with both.
//! They are shared between the cluster manager, the tiered storage engine,
//! and the Parquet codec; the codec's column layout is a direct projection
//! of [`VectorEntry`].

use serde::{Deserialize, Serialize};

/// A fixed-dimension embedding vector.
///
/// Dimensionality is enforced at the component boundaries (cluster manager,
/// codec), not by the type itself: a given deployment fixes the dimension at
/// initialisation and every entry is validated against it.
pub type Vector = Vec<f32>;

/// Which graph-store table a vector entry was embedded from.
///
/// Serialized as the lowercase table name (`"things"` / `"relationships"`)
/// to match the wire and column representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Things,
    Relationships,
}

impl SourceTable {
    /// Returns the column representation of this table name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Things => "things",
            Self::Relationships => "relationships",
        }
    }

    /// Parses a column representation back into a table tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "things" => Some(Self::Things),
            "relationships" => Some(Self::Relationships),
            _ => None,
        }
    }
}

/// Metadata carried alongside every persisted vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Tenant isolation key. Required; all searches scope to at most one
    /// namespace.
    pub namespace: String,

    /// Optional domain type of the source record (e.g. a graph node type).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,

    /// The original text the embedding was produced from, when retained.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text_content: Option<String>,
}

impl EntryMetadata {
    /// Creates metadata with only the required namespace set.
    #[must_use]
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: None,
            text_content: None,
        }
    }
}

/// The unit persisted in cold storage: one embedded graph record.
///
/// Invariants: `embedding.len()` equals the deployment's configured
/// dimension; `(metadata.namespace, id)` is unique across the corpus.
/// Entries are never mutated after ingestion -- update is delete + insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEntry {
    /// Stable identifier, globally unique within a namespace.
    pub id: String,

    /// The embedding itself.
    pub embedding: Vector,

    /// Which graph table this entry was embedded from.
    pub source_table: SourceTable,

    /// Opaque join key back to the graph store row.
    pub source_rowid: i64,

    /// Namespace, type, and retained text.
    pub metadata: EntryMetadata,
}

/// A graph node persisted by the surrounding system.
///
/// The engine treats the `data` payload as opaque JSON; it is carried through
/// the Parquet codec but never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    /// Stable identifier, unique within `namespace`.
    pub id: String,

    /// Tenant isolation key.
    pub namespace: String,

    /// Domain type of the node, when typed.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,

    /// Opaque node payload.
    pub data: serde_json::Value,

    /// Storage row id. `None` until assigned by the persistence layer;
    /// callers may leave it unset on write and read it back after encode.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rowid: Option<i64>,

    /// Creation time, unix milliseconds.
    pub created_at: i64,

    /// Last update time, unix milliseconds.
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
