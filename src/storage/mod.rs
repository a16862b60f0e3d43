//! Object storage backends.
//!
//! The [`backend::Storage`] trait abstracts over where bytes physically
//! live.  [`memory::InMemoryStorage`] is the reference implementation and
//! [`blocking::BlockingStorage`] offers a synchronous facade over any
//! backend.

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod blocking;
pub mod memory;

pub use backend::{Storage, StorageFuture};
pub use blocking::BlockingStorage;
pub use memory::InMemoryStorage;

/// Construct the backend named by `config.backend`.
pub fn build_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn Storage>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStorage::with_capacity_limit(
            config.memory.max_size_bytes,
        ))),
        other => anyhow::bail!("Unsupported storage backend: {other}"),
    }
}
