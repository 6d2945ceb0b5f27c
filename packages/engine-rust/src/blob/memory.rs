//! In-memory [`BlobStore`] backed by [`DashMap`].
//!
//! Concurrent reads and writes without external locking. Used by tests and
//! by single-process deployments whose cold tier fits in memory.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{BlobError, BlobMeta, BlobStore};

/// In-memory blob store with per-key sharded locking via `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn get_range(&self, key: &str, range: Range<usize>) -> Result<Option<Bytes>, BlobError> {
        let Some(entry) = self.objects.get(key) else {
            return Ok(None);
        };
        let data = entry.value();
        let end = range.end.min(data.len());
        let start = range.start.min(end);
        Ok(Some(data.slice(start..end)))
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMeta>, BlobError> {
        Ok(self.objects.get(key).map(|entry| BlobMeta {
            key: key.to_string(),
            size: entry.value().len(),
        }))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError> {
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
