//! Abstract storage trait.
//!
//! Every storage backend must implement [`Storage`].  The trait works in
//! terms of hierarchical [`Key`]s and streamed [`Content`], so callers
//! (including the storage lock) never need to know the underlying medium.
//!
//! Implementations must be linearizable per key: concurrent operations on
//! the same key observe one total order, and a completed `save` is visible
//! to every `list`, `exists` or `load` issued after it on the same
//! instance.

use std::future::Future;
use std::pin::Pin;

use crate::content::Content;
use crate::errors::StorageError;
use crate::key::Key;

/// Boxed future returned by every [`Storage`] operation.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Async key/value storage contract.
pub trait Storage: Send + Sync + 'static {
    /// Write `content` under `key`, replacing any existing entry.
    ///
    /// The content stream is fully consumed before the future completes.
    fn save(&self, key: &Key, content: Content) -> StorageFuture<'_, ()>;

    /// Read the entry at `key`.  Fails with `NotFound` if absent.
    fn load(&self, key: &Key) -> StorageFuture<'_, Content>;

    /// Check whether an entry exists at `key`.  Never fails for absence.
    fn exists(&self, key: &Key) -> StorageFuture<'_, bool>;

    /// List keys equal to or descending from `prefix`, ascending by
    /// canonical string, with segment-aligned matching.
    fn list(&self, prefix: &Key) -> StorageFuture<'_, Vec<Key>>;

    /// Remove the entry at `key`.  Fails with `NotFound` if absent.
    fn delete(&self, key: &Key) -> StorageFuture<'_, ()>;

    /// Size in bytes of the entry at `key`.  Fails with `NotFound` if absent.
    fn size(&self, key: &Key) -> StorageFuture<'_, u64>;

    /// Move the entry at `source` to `destination`, replacing whatever was
    /// there.  Fails with `NotFound` if `source` is absent.
    fn move_key(&self, source: &Key, destination: &Key) -> StorageFuture<'_, ()>;
}
