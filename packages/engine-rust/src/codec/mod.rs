//! Column-oriented Parquet codec for vector partitions and graph records.
//!
//! Wraps the `parquet`/`arrow` stack with the engine's fixed schemas:
//! row-group batching, per-file compression, embedded schema descriptors,
//! and footer-only metadata reads (the HEAD path never touches row groups).
//!
//! Encode/decode is CPU-bound and synchronous; callers on the async read
//! path decode off the hot loop per partition.

use std::collections::BTreeMap;

use bytes::Bytes;
use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod partition;
mod reader;
mod schema;
mod writer;

pub use partition::{
    partition_key_values, read_partition_metadata, PartitionHeadError, PartitionMetadata,
    KV_CLUSTER_ID, KV_CREATED_AT, KV_DIMENSIONALITY,
};
pub use reader::{deserialize, metadata};
pub use schema::{FieldDescriptor, LogicalAnnotation, ParquetRecord, PhysicalType};
pub use writer::serialize;

/// Key under which the field-descriptor copy is embedded when
/// `WriteOptions::include_schema` is set.
pub const SCHEMA_KEY: &str = "schema";

/// Error kinds for encode and decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Bad magic, truncated footer, or an undecodable row group.
    #[error("corrupt parquet file: {0}")]
    CorruptFile(String),

    /// A requested column does not exist in the file schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The file's compression cannot be decoded, or an unknown codec name
    /// was requested on encode.
    #[error("unsupported compression codec: {0}")]
    UnsupportedCodec(String),

    /// Embedding length differs within one file.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Encode-side failure in the underlying writer.
    #[error("parquet encode failure: {0}")]
    Encode(String),
}

/// Compression codecs the engine writes and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zstd,
    Snappy,
    Gzip,
    None,
}

impl Compression {
    /// Canonical lowercase name, as advertised in file metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Snappy => "snappy",
            Self::Gzip => "gzip",
            Self::None => "none",
        }
    }

    /// Parses a canonical name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "zstd" => Some(Self::Zstd),
            "snappy" => Some(Self::Snappy),
            "gzip" => Some(Self::Gzip),
            "none" | "uncompressed" => Some(Self::None),
            _ => None,
        }
    }

    /// Converts to the parquet writer codec, applying `level` for zstd.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedCodec`] for a zstd level outside
    /// the codec's accepted range.
    pub fn to_parquet(self, level: i32) -> Result<ParquetCompression, CodecError> {
        match self {
            Self::Zstd => {
                let level = ZstdLevel::try_new(level)
                    .map_err(|err| CodecError::UnsupportedCodec(err.to_string()))?;
                Ok(ParquetCompression::ZSTD(level))
            }
            Self::Snappy => Ok(ParquetCompression::SNAPPY),
            Self::Gzip => Ok(ParquetCompression::GZIP(GzipLevel::default())),
            Self::None => Ok(ParquetCompression::UNCOMPRESSED),
        }
    }
}

/// Options for [`serialize`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Per-column-chunk codec; one primary codec per file.
    pub compression: Compression,
    /// Zstd compression level (1-22). Ignored for other codecs.
    pub compression_level: i32,
    /// Maximum records per row group.
    pub row_group_size: usize,
    /// Embed a JSON copy of the field descriptors under [`SCHEMA_KEY`].
    pub include_schema: bool,
    /// Additional footer key-value metadata (e.g. partition identity).
    pub key_value_metadata: Vec<(String, String)>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Zstd,
            compression_level: 3,
            row_group_size: 1000,
            include_schema: true,
            key_value_metadata: Vec::new(),
        }
    }
}

/// Options for [`deserialize`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Column projection; `None` decodes all columns. Projection skips
    /// un-requested column chunks entirely.
    pub columns: Option<Vec<String>>,
    /// Maximum records to decode.
    pub limit: Option<usize>,
    /// Records to skip before decoding.
    pub offset: Option<usize>,
}

/// Descriptor of an encoded file, readable from the footer alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Total record count across all row groups.
    pub row_count: usize,
    /// Number of row groups.
    pub row_group_count: usize,
    /// The record type's field descriptors.
    pub schema: Vec<FieldDescriptor>,
    /// Encoded file size in bytes.
    pub file_size: usize,
    /// The file's primary codec.
    pub compression: Compression,
    /// Footer key-value metadata.
    pub key_value: BTreeMap<String, String>,
}

/// Result of [`serialize`]: the immutable buffer plus its descriptor.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    /// The encoded Parquet bytes.
    pub buffer: Bytes,
    /// Footer-derived descriptor of the buffer.
    pub metadata: FileMetadata,
}
