//! Fixed column schemas for the record types the codec understands.
//!
//! Each record type carries two schema views: the engine-facing
//! [`FieldDescriptor`] list (physical type + logical annotation, what
//! `schema()` exposes to callers) and the `arrow` schema the writer/reader
//! stack operates on. Embeddings are stored as raw little-endian IEEE-754
//! `f32` bytes in a BYTE_ARRAY column so round-trips are bit-exact.

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use terrace_core::{EntryMetadata, SourceTable, Thing, VectorEntry};

use super::CodecError;

// ---------------------------------------------------------------------------
// Field descriptors
// ---------------------------------------------------------------------------

/// Physical Parquet column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysicalType {
    Int64,
    Double,
    ByteArray,
    Boolean,
    Int32,
}

/// Logical-type annotation layered over the physical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalAnnotation {
    Utf8,
    Json,
    TimestampMillis,
    None,
}

/// One column in a record type's fixed schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name as written to the file.
    pub name: &'static str,
    /// Physical Parquet type.
    pub physical: PhysicalType,
    /// Logical annotation, [`LogicalAnnotation::None`] for raw columns.
    pub logical: LogicalAnnotation,
    /// Whether the column admits nulls.
    pub optional: bool,
}

/// A record type the codec can encode and decode.
///
/// `from_batch` must tolerate projected batches: columns absent from the
/// batch yield default values (the deserialize contract only covers
/// requested columns), while a column present with the wrong type is a
/// [`CodecError::SchemaMismatch`].
pub trait ParquetRecord: Sized + Send + Sync {
    /// Logical record-type name used in diagnostics.
    const RECORD_TYPE: &'static str;

    /// The fixed field descriptors, in column order.
    fn schema() -> &'static [FieldDescriptor];

    /// The arrow schema the writer and reader operate on.
    fn arrow_schema() -> SchemaRef;

    /// Builds one record batch from a slice of records.
    ///
    /// # Errors
    ///
    /// Returns an error when records are internally inconsistent (e.g.
    /// embedding dimensions differ) or the batch cannot be assembled.
    fn to_batch(records: &[Self]) -> Result<RecordBatch, CodecError>;

    /// Reconstructs records from a (possibly projected) batch.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] for wrongly-typed columns and
    /// [`CodecError::CorruptFile`] for undecodable cell payloads.
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, CodecError>;
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Looks up a column and downcasts it, distinguishing "absent" (projection)
/// from "present with the wrong type" (schema mismatch).
fn typed_column<'a, A: 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<&'a A>, CodecError> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };
    column
        .as_any()
        .downcast_ref::<A>()
        .map(Some)
        .ok_or_else(|| {
            CodecError::SchemaMismatch(format!(
                "column '{name}' has unexpected arrow type {:?}",
                column.data_type()
            ))
        })
}

fn opt_string(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

/// Decodes a raw little-endian `f32` byte payload into an embedding.
fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::CorruptFile(format!(
            "embedding payload of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

// ---------------------------------------------------------------------------
// VectorEntry
// ---------------------------------------------------------------------------

const VECTOR_ENTRY_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        name: "id",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: false,
    },
    FieldDescriptor {
        name: "embedding",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::None,
        optional: false,
    },
    FieldDescriptor {
        name: "source_table",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: false,
    },
    FieldDescriptor {
        name: "source_rowid",
        physical: PhysicalType::Int64,
        logical: LogicalAnnotation::None,
        optional: false,
    },
    FieldDescriptor {
        name: "ns",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: false,
    },
    FieldDescriptor {
        name: "type",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: true,
    },
    FieldDescriptor {
        name: "text_content",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: true,
    },
];

impl ParquetRecord for VectorEntry {
    const RECORD_TYPE: &'static str = "vector_entry";

    fn schema() -> &'static [FieldDescriptor] {
        VECTOR_ENTRY_FIELDS
    }

    fn arrow_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("embedding", DataType::Binary, false),
            Field::new("source_table", DataType::Utf8, false),
            Field::new("source_rowid", DataType::Int64, false),
            Field::new("ns", DataType::Utf8, false),
            Field::new("type", DataType::Utf8, true),
            Field::new("text_content", DataType::Utf8, true),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch, CodecError> {
        // All embeddings within a file share one dimension.
        let dimension = records.first().map_or(0, |r| r.embedding.len());
        for record in records {
            if record.embedding.len() != dimension {
                return Err(CodecError::DimensionMismatch {
                    expected: dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let embeddings: Vec<Vec<u8>> = records
            .iter()
            .map(|r| encode_embedding(&r.embedding))
            .collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.id.as_str()),
            )),
            Arc::new(BinaryArray::from_iter_values(
                embeddings.iter().map(Vec::as_slice),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.source_table.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                records.iter().map(|r| r.source_rowid),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.metadata.namespace.as_str()),
            )),
            Arc::new(StringArray::from_iter(
                records.iter().map(|r| r.metadata.kind.as_deref()),
            )),
            Arc::new(StringArray::from_iter(
                records.iter().map(|r| r.metadata.text_content.as_deref()),
            )),
        ];

        RecordBatch::try_new(Self::arrow_schema(), columns)
            .map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, CodecError> {
        let ids: Option<&StringArray> = typed_column(batch, "id")?;
        let embeddings: Option<&BinaryArray> = typed_column(batch, "embedding")?;
        let tables: Option<&StringArray> = typed_column(batch, "source_table")?;
        let rowids: Option<&Int64Array> = typed_column(batch, "source_rowid")?;
        let namespaces: Option<&StringArray> = typed_column(batch, "ns")?;
        let kinds: Option<&StringArray> = typed_column(batch, "type")?;
        let texts: Option<&StringArray> = typed_column(batch, "text_content")?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let source_table = match tables {
                Some(array) => SourceTable::parse(array.value(row)).ok_or_else(|| {
                    CodecError::CorruptFile(format!(
                        "unknown source_table '{}'",
                        array.value(row)
                    ))
                })?,
                None => SourceTable::Things,
            };

            records.push(Self {
                id: ids.map_or_else(String::new, |a| a.value(row).to_string()),
                embedding: match embeddings {
                    Some(array) => decode_embedding(array.value(row))?,
                    None => Vec::new(),
                },
                source_table,
                source_rowid: rowids.map_or(0, |a| a.value(row)),
                metadata: EntryMetadata {
                    namespace: namespaces.map_or_else(String::new, |a| a.value(row).to_string()),
                    kind: kinds.and_then(|a| opt_string(a, row)),
                    text_content: texts.and_then(|a| opt_string(a, row)),
                },
            });
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Thing
// ---------------------------------------------------------------------------

const THING_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        name: "id",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: false,
    },
    FieldDescriptor {
        name: "ns",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: false,
    },
    FieldDescriptor {
        name: "type",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Utf8,
        optional: true,
    },
    FieldDescriptor {
        name: "data",
        physical: PhysicalType::ByteArray,
        logical: LogicalAnnotation::Json,
        optional: false,
    },
    FieldDescriptor {
        name: "rowid",
        physical: PhysicalType::Int64,
        logical: LogicalAnnotation::None,
        optional: true,
    },
    FieldDescriptor {
        name: "created_at",
        physical: PhysicalType::Int64,
        logical: LogicalAnnotation::TimestampMillis,
        optional: false,
    },
    FieldDescriptor {
        name: "updated_at",
        physical: PhysicalType::Int64,
        logical: LogicalAnnotation::TimestampMillis,
        optional: false,
    },
];

impl ParquetRecord for Thing {
    const RECORD_TYPE: &'static str = "thing";

    fn schema() -> &'static [FieldDescriptor] {
        THING_FIELDS
    }

    fn arrow_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("ns", DataType::Utf8, false),
            Field::new("type", DataType::Utf8, true),
            Field::new("data", DataType::Utf8, false),
            Field::new("rowid", DataType::Int64, true),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                false,
            ),
            Field::new(
                "updated_at",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                false,
            ),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch, CodecError> {
        let payloads: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.data))
            .collect::<Result<_, _>>()
            .map_err(|err| CodecError::Encode(err.to_string()))?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.id.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.namespace.as_str()),
            )),
            Arc::new(StringArray::from_iter(
                records.iter().map(|r| r.kind.as_deref()),
            )),
            Arc::new(StringArray::from_iter_values(
                payloads.iter().map(String::as_str),
            )),
            Arc::new(Int64Array::from_iter(records.iter().map(|r| r.rowid))),
            Arc::new(TimestampMillisecondArray::from_iter_values(
                records.iter().map(|r| r.created_at),
            )),
            Arc::new(TimestampMillisecondArray::from_iter_values(
                records.iter().map(|r| r.updated_at),
            )),
        ];

        RecordBatch::try_new(Self::arrow_schema(), columns)
            .map_err(|err| CodecError::Encode(err.to_string()))
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, CodecError> {
        let ids: Option<&StringArray> = typed_column(batch, "id")?;
        let namespaces: Option<&StringArray> = typed_column(batch, "ns")?;
        let kinds: Option<&StringArray> = typed_column(batch, "type")?;
        let payloads: Option<&StringArray> = typed_column(batch, "data")?;
        let rowids: Option<&Int64Array> = typed_column(batch, "rowid")?;
        let created: Option<&TimestampMillisecondArray> = typed_column(batch, "created_at")?;
        let updated: Option<&TimestampMillisecondArray> = typed_column(batch, "updated_at")?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let data = match payloads {
                Some(array) => serde_json::from_str(array.value(row)).map_err(|err| {
                    CodecError::CorruptFile(format!("invalid JSON payload: {err}"))
                })?,
                None => serde_json::Value::Null,
            };

            records.push(Self {
                id: ids.map_or_else(String::new, |a| a.value(row).to_string()),
                namespace: namespaces.map_or_else(String::new, |a| a.value(row).to_string()),
                kind: kinds.and_then(|a| opt_string(a, row)),
                data,
                rowid: rowids.and_then(|a| {
                    if a.is_null(row) {
                        None
                    } else {
                        Some(a.value(row))
                    }
                }),
                created_at: created.map_or(0, |a| a.value(row)),
                updated_at: updated.map_or(0, |a| a.value(row)),
            });
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(id: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            embedding,
            source_table: SourceTable::Things,
            source_rowid: 1,
            metadata: EntryMetadata::for_namespace("ns"),
        }
    }

    // -- descriptors --

    #[test]
    fn vector_entry_schema_matches_column_layout() {
        let fields = VectorEntry::schema();
        let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "embedding",
                "source_table",
                "source_rowid",
                "ns",
                "type",
                "text_content"
            ]
        );
        // Only `type` and `text_content` admit nulls.
        let optional: Vec<&str> = fields.iter().filter(|f| f.optional).map(|f| f.name).collect();
        assert_eq!(optional, vec!["type", "text_content"]);
    }

    #[test]
    fn descriptor_serializes_parquet_type_names() {
        let json = serde_json::to_value(&VectorEntry::schema()[0]).unwrap();
        assert_eq!(json["physical"], "BYTE_ARRAY");
        assert_eq!(json["logical"], "UTF8");
    }

    #[test]
    fn arrow_schema_field_count_matches_descriptors() {
        assert_eq!(
            VectorEntry::arrow_schema().fields().len(),
            VectorEntry::schema().len()
        );
        assert_eq!(Thing::arrow_schema().fields().len(), Thing::schema().len());
    }

    // -- embedding bytes --

    #[test]
    fn embedding_bytes_round_trip_bit_exact() {
        let original = vec![1.0f32, -0.0, f32::MIN_POSITIVE, 0.123_456_79];
        let bytes = encode_embedding(&original);
        assert_eq!(bytes.len(), 16);
        let decoded = decode_embedding(&bytes).unwrap();
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn embedding_bytes_reject_ragged_payload() {
        let err = decode_embedding(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::CorruptFile(_)));
    }

    // -- batch round trips --

    #[test]
    fn vector_entry_batch_round_trip() {
        let entries = vec![
            make_entry("A", vec![1.0, 0.0]),
            VectorEntry {
                id: "B".to_string(),
                embedding: vec![0.0, 1.0],
                source_table: SourceTable::Relationships,
                source_rowid: -5,
                metadata: EntryMetadata {
                    namespace: "other".to_string(),
                    kind: Some("edge".to_string()),
                    text_content: None,
                },
            },
        ];

        let batch = VectorEntry::to_batch(&entries).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let decoded = VectorEntry::from_batch(&batch).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn vector_entry_batch_rejects_ragged_dimensions() {
        let entries = vec![make_entry("A", vec![1.0, 0.0]), make_entry("B", vec![1.0])];
        let err = VectorEntry::to_batch(&entries).unwrap_err();
        assert_eq!(
            err,
            CodecError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn thing_batch_round_trip() {
        let things = vec![Thing {
            id: "t-1".to_string(),
            namespace: "ns".to_string(),
            kind: None,
            data: serde_json::json!({"weight": 1.5}),
            rowid: None,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_001,
        }];

        let batch = Thing::to_batch(&things).unwrap();
        let decoded = Thing::from_batch(&batch).unwrap();
        assert_eq!(decoded, things);
    }

    #[test]
    fn from_batch_tolerates_projection() {
        let entries = vec![make_entry("A", vec![1.0, 0.0])];
        let batch = VectorEntry::to_batch(&entries).unwrap();

        // Project down to just id + ns.
        let projected = batch.project(&[0, 4]).unwrap();
        let decoded = VectorEntry::from_batch(&projected).unwrap();

        assert_eq!(decoded[0].id, "A");
        assert_eq!(decoded[0].metadata.namespace, "ns");
        assert!(decoded[0].embedding.is_empty());
    }

    #[test]
    fn empty_batch_round_trip() {
        let batch = VectorEntry::to_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert!(VectorEntry::from_batch(&batch).unwrap().is_empty());
    }
}
