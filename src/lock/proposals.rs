//! Lock proposals stored under a target's proposal root.
//!
//! For target `T` the proposal root is `T/.lock-proposals`.  Every
//! immediate child of the root is one proposal, named by its token.  The
//! child's value is either empty (never expires) or an RFC 3339 instant
//! (valid until then).  Expiry is evaluated when proposals are read;
//! nothing is evicted in the background.

use chrono::Utc;
use std::sync::Arc;

use super::Expiration;
use crate::content::Content;
use crate::errors::StorageError;
use crate::key::{Key, DELIMITER};
use crate::storage::Storage;

/// Reserved trailing segment marking a lock namespace.
pub const PROPOSALS_SEGMENT: &str = ".lock-proposals";

/// Check that `token` can name exactly one child of a proposal root.
pub fn validate_token(token: &str) -> Result<(), StorageError> {
    if token.is_empty() {
        return Err(StorageError::InvalidKey {
            message: "lock token must not be empty".to_string(),
        });
    }
    if token.contains(DELIMITER) {
        return Err(StorageError::InvalidKey {
            message: format!("lock token must not contain '{DELIMITER}': {token}"),
        });
    }
    Ok(())
}

/// The set of proposals registered for one lock target.
pub struct Proposals {
    storage: Arc<dyn Storage>,
    target: Key,
    root: Key,
}

impl Proposals {
    pub fn new(storage: Arc<dyn Storage>, target: Key) -> Self {
        let root = Self::root_key(&target);
        Self {
            storage,
            target,
            root,
        }
    }

    /// Proposal root for `target`.
    pub fn root_key(target: &Key) -> Key {
        target.child(PROPOSALS_SEGMENT)
    }

    pub fn target(&self) -> &Key {
        &self.target
    }

    pub fn root(&self) -> &Key {
        &self.root
    }

    /// Storage key of the proposal named `token`.
    pub fn key(&self, token: &str) -> Key {
        self.root.child(token)
    }

    /// Register (or overwrite) the proposal for `token`.
    pub async fn create(&self, token: &str, expiration: &Expiration) -> Result<(), StorageError> {
        let key = self.key(token);
        self.storage
            .save(&key, Content::from_bytes(expiration.encode()))
            .await?;
        tracing::debug!(target_key = %self.target, token, ?expiration, "Lock proposal registered");
        Ok(())
    }

    /// Tokens of every proposal currently registered, in key order.
    pub async fn tokens(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.storage.list(&self.root).await?;
        Ok(keys
            .iter()
            .filter(|k| k.parent().as_ref() == Some(&self.root))
            .filter_map(|k| k.name().map(str::to_string))
            .collect())
    }

    /// Succeed if no proposal other than `token`'s is still active.
    ///
    /// Empty proposals and proposals with a future instant conflict.
    /// Expired proposals are ignored and left in place.  A payload that
    /// cannot be decoded counts as never expiring.  A proposal removed
    /// between listing and loading is treated as absent.
    pub async fn check_single(&self, token: &str) -> Result<(), StorageError> {
        let now = Utc::now();
        for other in self.tokens().await? {
            if other == token {
                continue;
            }
            let payload = match self.storage.load(&self.key(&other)).await {
                Ok(content) => content.into_bytes().await?,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let active = match Expiration::decode(&payload) {
                Ok(expiration) => expiration.is_active_at(now),
                Err(e) => {
                    tracing::warn!(
                        target_key = %self.target,
                        token = %other,
                        error = %e,
                        "Unreadable lock proposal, treating as never expiring"
                    );
                    true
                }
            };
            if active {
                tracing::debug!(target_key = %self.target, holder = %other, "Lock held by another proposal");
                return Err(StorageError::LockConflict {
                    target: self.target.clone(),
                    rollback: None,
                });
            }
            tracing::debug!(target_key = %self.target, token = %other, "Ignoring expired lock proposal");
        }
        Ok(())
    }

    /// Remove the proposal for `token`.  Absence is not an error.
    pub async fn delete(&self, token: &str) -> Result<(), StorageError> {
        match self.storage.delete(&self.key(token)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
