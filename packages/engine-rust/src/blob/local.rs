//! Filesystem-backed [`BlobStore`] over `object_store`'s local adapter.
//!
//! Suitable for single-node deployments and integration tests that need a
//! durable cold tier. Keys map directly to paths under the configured root.

use std::ops::Range;
use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;

use super::{BlobError, BlobMeta, BlobStore};

/// Blob store rooted at a local directory.
pub struct LocalBlobStore {
    client: Arc<LocalFileSystem>,
}

impl std::fmt::Debug for LocalBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalBlobStore")
    }
}

impl LocalBlobStore {
    /// Creates a store rooted at `root`. The directory must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Backend`] when the root cannot be opened.
    pub fn new(root: &FsPath) -> Result<Self, BlobError> {
        let client = LocalFileSystem::new_with_prefix(root)
            .map_err(|err| BlobError::Backend(err.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

/// Maps an `object_store` error, folding `NotFound` into `Ok(None)`.
fn absent_or<T>(err: object_store::Error) -> Result<Option<T>, BlobError> {
    match err {
        object_store::Error::NotFound { .. } => Ok(None),
        other => Err(BlobError::Backend(other.to_string())),
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        let result = match self.client.get(&Path::from(key)).await {
            Ok(result) => result,
            Err(err) => return absent_or(err),
        };
        let data = result
            .bytes()
            .await
            .map_err(|err| BlobError::Backend(err.to_string()))?;
        Ok(Some(data))
    }

    async fn get_range(&self, key: &str, range: Range<usize>) -> Result<Option<Bytes>, BlobError> {
        match self.client.get_range(&Path::from(key), range).await {
            Ok(data) => Ok(Some(data)),
            Err(err) => absent_or(err),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<BlobMeta>, BlobError> {
        match self.client.head(&Path::from(key)).await {
            Ok(meta) => Ok(Some(BlobMeta {
                key: key.to_string(),
                size: meta.size,
            })),
            Err(err) => absent_or(err),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobError> {
        self.client
            .put(&Path::from(key), data.into())
            .await
            .map_err(|err| BlobError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let prefix_path = Path::from(prefix);
        let mut keys: Vec<String> = self
            .client
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|err| BlobError::Backend(err.to_string()))?;
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        match self.client.delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(BlobError::Backend(err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
