//! In-memory storage backend.
//!
//! Entries live in a single `tokio::sync::RwLock<BTreeMap<...>>` keyed by
//! the canonical key string, so per-key operations are linearizable and
//! listing falls out of the map's ordering.  Clones share the same map,
//! which lets tests model several independent processes against one store.
//!
//! A configurable memory limit (`max_size_bytes`) caps total stored bytes.
//! Nothing is persisted across restarts.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use super::backend::{Storage, StorageFuture};
use crate::content::Content;
use crate::errors::StorageError;
use crate::key::{Key, DELIMITER};
use crate::metrics::record_storage_op;

/// Map contents plus the running byte total, guarded together.
#[derive(Default)]
struct Entries {
    /// canonical key -> stored bytes.
    data: BTreeMap<String, Bytes>,
    /// Current total bytes stored.
    size: u64,
}

/// In-memory storage backend.
#[derive(Clone)]
pub struct InMemoryStorage {
    entries: Arc<tokio::sync::RwLock<Entries>>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
}

impl InMemoryStorage {
    /// Create an empty, unlimited store.
    pub fn new() -> Self {
        Self::with_capacity_limit(0)
    }

    /// Create an empty store holding at most `max_size_bytes` (0 = unlimited).
    pub fn with_capacity_limit(max_size_bytes: u64) -> Self {
        tracing::info!(max_size_bytes, "In-memory storage initialized");
        Self {
            entries: Arc::new(tokio::sync::RwLock::new(Entries::default())),
            max_size_bytes,
        }
    }

    /// Total bytes currently stored.
    pub async fn total_size(&self) -> u64 {
        self.entries.read().await.size
    }

    /// Check whether growing the store by `additional` bytes would exceed
    /// the memory limit.
    fn check_capacity(&self, current: u64, additional: u64) -> Result<(), StorageError> {
        if self.max_size_bytes == 0 {
            return Ok(());
        }
        if current + additional > self.max_size_bytes {
            return Err(anyhow::anyhow!(
                "Memory limit exceeded: current={current}, additional={additional}, max={}",
                self.max_size_bytes
            )
            .into());
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the stored canonical string `candidate` equals `prefix` or
/// descends from it on a segment boundary.
fn matches_prefix(prefix: &str, candidate: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    candidate.starts_with(prefix)
        && (candidate.len() == prefix.len()
            || candidate[prefix.len()..].starts_with(DELIMITER))
}

// ── Storage implementation ─────────────────────────────────────────────

impl Storage for InMemoryStorage {
    fn save(&self, key: &Key, content: Content) -> StorageFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let result = async {
                // Drain before taking the lock so slow producers never block
                // other keys.
                let data = content.into_bytes().await?;
                let new_len = data.len() as u64;

                let mut entries = self.entries.write().await;
                let old_len = entries
                    .data
                    .get(key.as_str())
                    .map(|d| d.len() as u64)
                    .unwrap_or(0);
                if new_len > old_len {
                    self.check_capacity(entries.size, new_len - old_len)?;
                }
                entries.data.insert(key.as_str().to_string(), data);
                entries.size = entries.size - old_len + new_len;
                Ok::<(), StorageError>(())
            }
            .await;
            record_storage_op("save", &result);
            result
        })
    }

    fn load(&self, key: &Key) -> StorageFuture<'_, Content> {
        let key = key.clone();
        Box::pin(async move {
            let result = {
                let entries = self.entries.read().await;
                match entries.data.get(key.as_str()) {
                    Some(data) => Ok(Content::from_bytes(data.clone())),
                    None => Err(StorageError::not_found(&key)),
                }
            };
            record_storage_op("load", &result);
            result
        })
    }

    fn exists(&self, key: &Key) -> StorageFuture<'_, bool> {
        let key = key.clone();
        Box::pin(async move {
            let entries = self.entries.read().await;
            let result = Ok(entries.data.contains_key(key.as_str()));
            record_storage_op("exists", &result);
            result
        })
    }

    fn list(&self, prefix: &Key) -> StorageFuture<'_, Vec<Key>> {
        let prefix = prefix.clone();
        Box::pin(async move {
            let entries = self.entries.read().await;
            let prefix = prefix.as_str();
            // Every match sorts at or after `prefix` and starts with it, so
            // the scan stops at the first key that no longer does.
            let keys: Vec<Key> = entries
                .data
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(prefix))
                .filter(|k| matches_prefix(prefix, k))
                .map(|k| Key::new(k))
                .collect();
            let result = Ok(keys);
            record_storage_op("list", &result);
            result
        })
    }

    fn delete(&self, key: &Key) -> StorageFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let result = {
                let mut entries = self.entries.write().await;
                match entries.data.remove(key.as_str()) {
                    Some(data) => {
                        entries.size = entries.size.saturating_sub(data.len() as u64);
                        Ok(())
                    }
                    None => Err(StorageError::not_found(&key)),
                }
            };
            record_storage_op("delete", &result);
            result
        })
    }

    fn size(&self, key: &Key) -> StorageFuture<'_, u64> {
        let key = key.clone();
        Box::pin(async move {
            let result = {
                let entries = self.entries.read().await;
                entries
                    .data
                    .get(key.as_str())
                    .map(|d| d.len() as u64)
                    .ok_or_else(|| StorageError::not_found(&key))
            };
            record_storage_op("size", &result);
            result
        })
    }

    fn move_key(&self, source: &Key, destination: &Key) -> StorageFuture<'_, ()> {
        let source = source.clone();
        let destination = destination.clone();
        Box::pin(async move {
            let result = {
                let mut entries = self.entries.write().await;
                match entries.data.remove(source.as_str()) {
                    Some(data) => {
                        if let Some(replaced) =
                            entries.data.insert(destination.as_str().to_string(), data)
                        {
                            entries.size = entries.size.saturating_sub(replaced.len() as u64);
                        }
                        Ok(())
                    }
                    None => Err(StorageError::not_found(&source)),
                }
            };
            record_storage_op("move", &result);
            result
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
