//! Mutual exclusion built on top of [`Storage`].
//!
//! A lock on a target key is never stored directly.  Each contender
//! registers a *proposal* under the target's proposal root and then checks
//! whether any other unexpired proposal exists there.  See
//! [`storage::StorageLock`] for the protocol and [`proposals::Proposals`]
//! for the on-storage layout.

use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::errors::StorageError;
use crate::key::Key;
use crate::storage::{Storage, StorageFuture};

pub mod proposals;
pub mod storage;

pub use proposals::Proposals;
pub use storage::StorageLock;

/// Asynchronous lock contract.
pub trait Lock: Send + Sync {
    /// Try once to take the lock.  Fails with `LockConflict` if held.
    fn acquire(&self) -> StorageFuture<'_, ()>;

    /// Give the lock up.  Succeeds even if it was not held.
    fn release(&self) -> StorageFuture<'_, ()>;
}

/// When a lock proposal stops counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Holds until explicitly released.
    Never,
    /// Holds until this instant has passed.
    At(DateTime<Utc>),
}

/// Proposal payload that is neither empty nor a valid timestamp.
#[derive(Debug, Error)]
pub enum ExpirationDecodeError {
    #[error("proposal payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("proposal payload is not an RFC 3339 timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

impl Expiration {
    /// Expiration `ttl` from now.  A ttl too large to represent never expires.
    pub fn after(ttl: Duration) -> Self {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .map_or(Expiration::Never, Expiration::At)
    }

    /// Serialized proposal payload: empty for `Never`, RFC 3339 UTC
    /// otherwise (e.g. `2020-08-18T13:09:30.429Z`).
    pub fn encode(&self) -> String {
        match self {
            Expiration::Never => String::new(),
            Expiration::At(instant) => instant.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// Parse a proposal payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ExpirationDecodeError> {
        if payload.is_empty() {
            return Ok(Expiration::Never);
        }
        let text = std::str::from_utf8(payload)?;
        let instant = DateTime::parse_from_rfc3339(text)?;
        Ok(Expiration::At(instant.with_timezone(&Utc)))
    }

    /// Whether a proposal with this expiration still counts at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiration::Never => true,
            Expiration::At(instant) => *instant > now,
        }
    }
}

/// Run `op` while holding a non-expiring lock on `key`.
///
/// The lock is released whether or not `op` succeeds.  A release failure
/// is returned only when `op` itself succeeded; otherwise `op`'s error wins.
pub async fn exclusively<F, Fut, T>(
    storage: Arc<dyn Storage>,
    key: &Key,
    op: F,
) -> Result<T, StorageError>
where
    F: FnOnce(Arc<dyn Storage>) -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let lock = StorageLock::new(Arc::clone(&storage), key.clone());
    lock.acquire().await?;
    let result = op(storage).await;
    let released = lock.release().await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            tracing::warn!(key = %key, error = %release_err, "Failed to release lock after failed operation");
            Err(e)
        }
    }
}
