//! Blob adapter: the contract for the immutable cold-tier object store.
//!
//! Cold partitions live in a content-addressed blob store behind the
//! [`BlobStore`] trait. The engine only ever issues whole-object `get`/`put`,
//! ranged reads for footer-only metadata lookups, `head`, `list`, and
//! `delete`. Two implementations ship: [`MemoryBlobStore`] for tests and
//! single-process deployments, and [`LocalBlobStore`] backed by
//! `object_store`'s filesystem adapter.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

/// Error kinds surfaced by blob implementations.
///
/// A missing key is *not* an error: `get`/`get_range`/`head` return
/// `Ok(None)` so the search path can degrade per-partition instead of
/// failing the query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// The underlying store failed; retryable at the caller's discretion.
    #[error("blob backend error: {0}")]
    Backend(String),

    /// The operation exceeded the backend's deadline.
    #[error("blob operation timed out")]
    Timeout,
}

/// Size and identity of a stored blob, from a HEAD-style lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// The key the blob is stored under.
    pub key: String,
    /// Total object size in bytes.
    pub size: usize,
}

/// GET/HEAD/LIST contract over a string key namespace.
///
/// Keys are opaque `/`-separated paths. Objects are immutable in intent;
/// `put` over an existing key replaces the whole object (the ingest path
/// always writes full partitions and serialises per-cluster writers).
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Fetches the full object, or `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError>;

    /// Fetches a byte range of the object, or `None` when the key is absent.
    ///
    /// Implementations must support suffix reads so Parquet footers can be
    /// decoded without transferring row-group bytes.
    async fn get_range(&self, key: &str, range: Range<usize>) -> Result<Option<Bytes>, BlobError>;

    /// Returns object metadata without transferring content.
    async fn head(&self, key: &str) -> Result<Option<BlobMeta>, BlobError>;

    /// Stores the object under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError>;

    /// Lists all keys under the given prefix, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;

    /// Removes the object. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}
