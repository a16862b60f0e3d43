//! asto -- abstract async object storage.
//!
//! This crate provides hierarchical [`key::Key`]s, streamed
//! [`content::Content`], the backend-agnostic [`storage::Storage`] trait
//! with an in-memory reference backend and a blocking facade, and a
//! distributed lock ([`lock::StorageLock`]) built purely on storage
//! operations, so independent processes can coordinate writes without a
//! dedicated lock service.

pub mod config;
pub mod content;
pub mod errors;
pub mod key;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod storage;

pub use content::Content;
pub use errors::StorageError;
pub use key::Key;
pub use lock::{exclusively, Expiration, Lock, StorageLock};
pub use storage::{BlockingStorage, InMemoryStorage, Storage};
