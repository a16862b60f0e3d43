//! Storage and locking error types.
//!
//! Every fallible storage or lock operation returns [`StorageError`].
//! Backend I/O failures travel as [`anyhow::Error`] inside
//! [`StorageError::Backend`] and are never relabeled, so a lock conflict
//! and a broken backend stay distinguishable.

use thiserror::Error;

use crate::key::Key;

/// Errors surfaced by storage backends and the storage lock.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key has no entry in storage.
    #[error("No value for key: {key}")]
    NotFound { key: Key },

    /// Another unexpired proposal blocks acquisition of the lock.
    ///
    /// `rollback` carries the failure of the best-effort removal of the
    /// caller's own proposal, if that removal failed.
    #[error(
        "Failed to acquire lock on {target}: another proposal is active{}",
        .rollback.as_ref().map(|e| format!(" (rollback failed: {e})")).unwrap_or_default()
    )]
    LockConflict {
        target: Key,
        rollback: Option<Box<StorageError>>,
    },

    /// A key or lock token is malformed.
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    /// Transport or I/O failure inside a backend.
    #[error("Storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    /// Stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NotFound",
            StorageError::LockConflict { .. } => "LockConflict",
            StorageError::InvalidKey { .. } => "InvalidKey",
            StorageError::Backend(_) => "BackendFailure",
        }
    }

    pub fn not_found(key: &Key) -> Self {
        StorageError::NotFound { key: key.clone() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::LockConflict { .. })
    }
}
