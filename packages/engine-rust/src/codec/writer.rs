//! Encode path: records in, immutable Parquet buffer out.

use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use super::{metadata, CodecError, EncodedFile, ParquetRecord, WriteOptions, SCHEMA_KEY};

/// Encodes `records` into a self-describing Parquet buffer.
///
/// Records are written in row groups of at most `options.row_group_size`;
/// the footer carries the caller's key-value metadata plus (when
/// `include_schema` is set) a JSON copy of the field descriptors. The
/// returned [`EncodedFile::metadata`] is re-read from the produced footer,
/// so it is exactly what [`metadata`] reports for the buffer.
///
/// # Errors
///
/// Returns [`CodecError::DimensionMismatch`] for ragged embeddings,
/// [`CodecError::UnsupportedCodec`] for an invalid zstd level, and
/// [`CodecError::Encode`] when the underlying writer fails.
pub fn serialize<R: ParquetRecord>(
    records: &[R],
    options: &WriteOptions,
) -> Result<EncodedFile, CodecError> {
    if options.row_group_size == 0 {
        return Err(CodecError::Encode(
            "row_group_size must be positive".to_string(),
        ));
    }

    let mut key_values: Vec<KeyValue> = options
        .key_value_metadata
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
        .collect();
    if options.include_schema {
        let schema_json = serde_json::to_string(R::schema())
            .map_err(|err| CodecError::Encode(err.to_string()))?;
        key_values.push(KeyValue::new(SCHEMA_KEY.to_string(), schema_json));
    }

    let properties = WriterProperties::builder()
        .set_max_row_group_size(options.row_group_size)
        .set_compression(options.compression.to_parquet(options.compression_level)?)
        .set_key_value_metadata((!key_values.is_empty()).then_some(key_values))
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, R::arrow_schema(), Some(properties))
        .map_err(|err| CodecError::Encode(err.to_string()))?;

    for chunk in records.chunks(options.row_group_size) {
        let batch = R::to_batch(chunk)?;
        writer
            .write(&batch)
            .map_err(|err| CodecError::Encode(err.to_string()))?;
    }
    writer
        .close()
        .map_err(|err| CodecError::Encode(err.to_string()))?;

    let buffer = Bytes::from(buf);
    let mut file_metadata = metadata::<R>(&buffer)?;
    if records.is_empty() {
        // No column chunks to read the codec back from.
        file_metadata.compression = options.compression;
    }

    Ok(EncodedFile {
        buffer,
        metadata: file_metadata,
    })
}
