//! Partition-level metadata: footer key-values and the HEAD lookup path.
//!
//! Every cold partition footer carries `cluster_id`, `dimensionality`, and
//! `created_at` key-values so routing metadata is readable via two ranged
//! blob reads (footer length, then footer bytes) without ever transferring
//! row-group data.

use parquet::file::metadata::ParquetMetaDataReader;
use thiserror::Error;

use crate::blob::{BlobError, BlobStore};

use super::reader::{key_value_map, primary_compression};
use super::{CodecError, Compression};

/// Footer key for the owning cluster id.
pub const KV_CLUSTER_ID: &str = "cluster_id";
/// Footer key for the embedding dimension.
pub const KV_DIMENSIONALITY: &str = "dimensionality";
/// Footer key for the partition write time (unix ms).
pub const KV_CREATED_AT: &str = "created_at";

/// Trailing footer: 4-byte metadata length + `PAR1` magic.
const FOOTER_SIZE: usize = 8;

/// Error kinds for the partition HEAD path.
#[derive(Debug, Error)]
pub enum PartitionHeadError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// HEAD-readable descriptor of one cold partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// The cluster whose vectors the partition holds.
    pub cluster_id: String,
    /// Row count.
    pub vector_count: usize,
    /// Embedding dimension of every stored vector.
    pub dimensionality: usize,
    /// The partition's primary codec.
    pub compression: Compression,
    /// Total object size in bytes.
    pub size_bytes: usize,
    /// Partition write time, unix milliseconds.
    pub created_at: i64,
}

/// Builds the footer key-values stamped onto every partition write.
#[must_use]
pub fn partition_key_values(
    cluster_id: &str,
    dimensionality: usize,
    created_at: i64,
) -> Vec<(String, String)> {
    vec![
        (KV_CLUSTER_ID.to_string(), cluster_id.to_string()),
        (KV_DIMENSIONALITY.to_string(), dimensionality.to_string()),
        (KV_CREATED_AT.to_string(), created_at.to_string()),
    ]
}

fn required<'a>(
    kv: &'a std::collections::BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, CodecError> {
    kv.get(key)
        .map(String::as_str)
        .ok_or_else(|| CodecError::CorruptFile(format!("partition footer missing '{key}'")))
}

/// Resolves a partition's metadata via ranged reads of its footer.
///
/// Returns `Ok(None)` when the key is absent (or vanishes between reads).
///
/// # Errors
///
/// Returns [`PartitionHeadError::Blob`] on backend failures and
/// [`PartitionHeadError::Codec`] when the footer is truncated, has bad
/// magic, or lacks the partition key-values.
pub async fn read_partition_metadata(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<PartitionMetadata>, PartitionHeadError> {
    let Some(head) = store.head(key).await? else {
        return Ok(None);
    };
    if head.size < FOOTER_SIZE {
        return Err(
            CodecError::CorruptFile(format!("object of {} bytes has no footer", head.size)).into(),
        );
    }

    let Some(tail) = store
        .get_range(key, head.size - FOOTER_SIZE..head.size)
        .await?
    else {
        return Ok(None);
    };
    let mut footer = [0u8; FOOTER_SIZE];
    if tail.len() != FOOTER_SIZE {
        return Err(CodecError::CorruptFile("truncated footer read".to_string()).into());
    }
    footer.copy_from_slice(&tail);

    let metadata_len = ParquetMetaDataReader::decode_footer(&footer)
        .map_err(|err| CodecError::CorruptFile(err.to_string()))?;
    let metadata_start = head
        .size
        .checked_sub(FOOTER_SIZE + metadata_len)
        .ok_or_else(|| {
            CodecError::CorruptFile(format!(
                "footer claims {metadata_len} metadata bytes in a {}-byte object",
                head.size
            ))
        })?;

    let Some(metadata_bytes) = store
        .get_range(key, metadata_start..head.size - FOOTER_SIZE)
        .await?
    else {
        return Ok(None);
    };
    let parquet_meta = ParquetMetaDataReader::decode_metadata(&metadata_bytes)
        .map_err(|err| CodecError::CorruptFile(err.to_string()))?;

    let kv = key_value_map(&parquet_meta);
    let cluster_id = required(&kv, KV_CLUSTER_ID)?.to_string();
    let dimensionality: usize = required(&kv, KV_DIMENSIONALITY)?
        .parse()
        .map_err(|_| CodecError::CorruptFile("non-numeric dimensionality".to_string()))?;
    let created_at: i64 = required(&kv, KV_CREATED_AT)?
        .parse()
        .map_err(|_| CodecError::CorruptFile("non-numeric created_at".to_string()))?;

    let vector_count = usize::try_from(parquet_meta.file_metadata().num_rows()).unwrap_or(0);

    Ok(Some(PartitionMetadata {
        cluster_id,
        vector_count,
        dimensionality,
        compression: primary_compression(&parquet_meta).map_err(PartitionHeadError::Codec)?,
        size_bytes: head.size,
        created_at,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
