//! Blocking facade over an async [`Storage`].
//!
//! Each call drives the underlying future to completion on a private
//! current-thread tokio runtime.  Every failure, `NotFound` included, comes
//! back as an opaque [`anyhow::Error`].
//!
//! Must not be used from inside an async context: blocking on a runtime
//! from within another runtime panics.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

use super::backend::Storage;
use crate::content::Content;
use crate::key::Key;

/// Synchronous storage adapter.
pub struct BlockingStorage {
    storage: Arc<dyn Storage>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingStorage {
    /// Wrap `storage` with a dedicated runtime.
    pub fn new(storage: Arc<dyn Storage>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { storage, runtime })
    }

    fn block<F, T>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = Result<T, crate::errors::StorageError>>,
    {
        Ok(self.runtime.block_on(fut)?)
    }

    /// Save `data` under `key`.
    pub fn save(&self, key: &Key, data: impl Into<Bytes>) -> anyhow::Result<()> {
        self.block(self.storage.save(key, Content::from_bytes(data)))
    }

    /// Load the full value at `key` into one buffer.
    pub fn value(&self, key: &Key) -> anyhow::Result<Bytes> {
        self.block(async {
            let content = self.storage.load(key).await?;
            content.into_bytes().await
        })
    }

    pub fn list(&self, prefix: &Key) -> anyhow::Result<Vec<Key>> {
        self.block(self.storage.list(prefix))
    }

    pub fn exists(&self, key: &Key) -> anyhow::Result<bool> {
        self.block(self.storage.exists(key))
    }

    pub fn delete(&self, key: &Key) -> anyhow::Result<()> {
        self.block(self.storage.delete(key))
    }

    pub fn size(&self, key: &Key) -> anyhow::Result<u64> {
        self.block(self.storage.size(key))
    }

    pub fn move_key(&self, source: &Key, destination: &Key) -> anyhow::Result<()> {
        self.block(self.storage.move_key(source, destination))
    }
}
