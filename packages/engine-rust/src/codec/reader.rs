//! Decode path: footer-only metadata reads and (optionally projected)
//! record decodes.

use std::collections::BTreeMap;

use bytes::Bytes;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder,
};
use parquet::arrow::ProjectionMask;
use parquet::basic::Compression as ParquetCompression;
use parquet::errors::ParquetError;
use parquet::file::metadata::ParquetMetaData;

use super::{CodecError, Compression, FileMetadata, ParquetRecord, ReadOptions};

pub(super) fn map_parquet_error(err: &ParquetError) -> CodecError {
    match err {
        ParquetError::NYI(msg) => CodecError::UnsupportedCodec(msg.clone()),
        other => CodecError::CorruptFile(other.to_string()),
    }
}

/// Resolves the file's primary codec from its first column chunk.
pub(super) fn primary_compression(meta: &ParquetMetaData) -> Result<Compression, CodecError> {
    if meta.num_row_groups() == 0 {
        return Ok(Compression::None);
    }
    match meta.row_group(0).column(0).compression() {
        ParquetCompression::ZSTD(_) => Ok(Compression::Zstd),
        ParquetCompression::SNAPPY => Ok(Compression::Snappy),
        ParquetCompression::GZIP(_) => Ok(Compression::Gzip),
        ParquetCompression::UNCOMPRESSED => Ok(Compression::None),
        other => Err(CodecError::UnsupportedCodec(format!("{other:?}"))),
    }
}

pub(super) fn key_value_map(meta: &ParquetMetaData) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(kvs) = meta.file_metadata().key_value_metadata() {
        for kv in kvs {
            if let Some(value) = &kv.value {
                out.insert(kv.key.clone(), value.clone());
            }
        }
    }
    out
}

pub(super) fn build_file_metadata<R: ParquetRecord>(
    meta: &ParquetMetaData,
    file_size: usize,
) -> Result<FileMetadata, CodecError> {
    let row_count = usize::try_from(meta.file_metadata().num_rows()).unwrap_or(0);
    Ok(FileMetadata {
        row_count,
        row_group_count: meta.num_row_groups(),
        schema: R::schema().to_vec(),
        file_size,
        compression: primary_compression(meta)?,
        key_value: key_value_map(meta),
    })
}

/// Reads the file descriptor from the trailing footer region only.
///
/// Never touches row-group data, so it is safe on the HEAD path.
///
/// # Errors
///
/// Returns [`CodecError::CorruptFile`] on bad magic or a truncated footer.
pub fn metadata<R: ParquetRecord>(buffer: &Bytes) -> Result<FileMetadata, CodecError> {
    let loaded = ArrowReaderMetadata::load(buffer, ArrowReaderOptions::new())
        .map_err(|err| map_parquet_error(&err))?;
    build_file_metadata::<R>(loaded.metadata(), buffer.len())
}

/// Decodes records from an encoded buffer.
///
/// `options.columns` projects the decode: un-requested column chunks are
/// skipped entirely and the corresponding record fields come back as
/// defaults. `offset`/`limit` select a record window across row groups.
/// A row group either decodes fully or the call fails.
///
/// # Errors
///
/// Returns [`CodecError::CorruptFile`] on bad magic/footer or undecodable
/// row groups, [`CodecError::SchemaMismatch`] when a requested column is
/// absent, and [`CodecError::UnsupportedCodec`] when the file's compression
/// cannot be decoded.
pub fn deserialize<R: ParquetRecord>(
    buffer: &Bytes,
    options: &ReadOptions,
) -> Result<Vec<R>, CodecError> {
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(buffer.clone())
        .map_err(|err| map_parquet_error(&err))?;

    if let Some(columns) = &options.columns {
        let mask = {
            let parquet_schema = builder.parquet_schema();
            let mut indices = Vec::with_capacity(columns.len());
            for name in columns {
                let index = parquet_schema
                    .columns()
                    .iter()
                    .position(|column| column.name() == name)
                    .ok_or_else(|| {
                        CodecError::SchemaMismatch(format!(
                            "requested column '{name}' is absent from the file schema"
                        ))
                    })?;
                indices.push(index);
            }
            ProjectionMask::leaves(parquet_schema, indices)
        };
        builder = builder.with_projection(mask);
    }

    if let Some(offset) = options.offset {
        builder = builder.with_offset(offset);
    }
    if let Some(limit) = options.limit {
        builder = builder.with_limit(limit);
    }

    let reader = builder.build().map_err(|err| map_parquet_error(&err))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| CodecError::CorruptFile(err.to_string()))?;
        records.extend(R::from_batch(&batch)?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
