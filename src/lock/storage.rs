//! Storage-backed lock.
//!
//! One acquisition attempt is a single optimistic round:
//!
//! 1. write our own proposal under the target's proposal root,
//! 2. list every proposal registered there,
//! 3. fail if any *other* proposal is empty or not yet expired,
//!    removing our own proposal first (best effort),
//! 4. otherwise our proposal stays in place as the recorded holder.
//!
//! There is no re-check and no retry.  Mutual exclusion follows from
//! per-key linearizability and read-your-writes visibility of the backing
//! storage: of two attempts, the one that lists second always sees the
//! other's proposal.  Callers wanting to wait for the lock re-invoke
//! [`StorageLock::acquire`] with their own backoff.

use std::sync::Arc;

use super::proposals::{validate_token, Proposals};
use super::{Expiration, Lock};
use crate::errors::StorageError;
use crate::key::Key;
use crate::metrics::{record_lock_attempt, record_lock_release};
use crate::storage::{Storage, StorageFuture};

/// Lock on one target key, identified by a token.
pub struct StorageLock {
    proposals: Proposals,
    token: String,
    expiration: Expiration,
}

impl StorageLock {
    /// Non-expiring lock on `target` with a freshly generated token.
    pub fn new(storage: Arc<dyn Storage>, target: Key) -> Self {
        Self {
            proposals: Proposals::new(storage, target),
            token: uuid::Uuid::new_v4().to_string(),
            expiration: Expiration::Never,
        }
    }

    /// Lock on `target` with a caller-chosen token and expiration.
    ///
    /// Fails with `InvalidKey` if `token` is empty or contains `/`.
    pub fn with_token(
        storage: Arc<dyn Storage>,
        target: Key,
        token: impl Into<String>,
        expiration: Expiration,
    ) -> Result<Self, StorageError> {
        let token = token.into();
        validate_token(&token)?;
        Ok(Self {
            proposals: Proposals::new(storage, target),
            token,
            expiration,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn target(&self) -> &Key {
        self.proposals.target()
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    /// Try once to take the lock.
    ///
    /// Re-acquiring with a token that already has a proposal always treats
    /// that proposal as our own and overwrites it.  On any failure after
    /// our proposal was written, it is removed again (best effort).
    pub async fn acquire(&self) -> Result<(), StorageError> {
        if let Err(e) = self.proposals.create(&self.token, &self.expiration).await {
            record_lock_attempt("error");
            return Err(e);
        }

        match self.proposals.check_single(&self.token).await {
            Ok(()) => {
                record_lock_attempt("acquired");
                tracing::debug!(target_key = %self.target(), token = %self.token, "Lock acquired");
                Ok(())
            }
            Err(StorageError::LockConflict { target, .. }) => {
                record_lock_attempt("conflict");
                let rollback = match self.proposals.delete(&self.token).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!(
                            target_key = %target,
                            token = %self.token,
                            error = %e,
                            "Failed to roll back lock proposal after conflict"
                        );
                        Some(Box::new(e))
                    }
                };
                Err(StorageError::LockConflict { target, rollback })
            }
            Err(e) => {
                record_lock_attempt("error");
                if let Err(rollback) = self.proposals.delete(&self.token).await {
                    tracing::warn!(
                        target_key = %self.target(),
                        token = %self.token,
                        error = %rollback,
                        "Failed to roll back lock proposal after storage error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Remove our proposal.  Succeeds if it is already gone.
    pub async fn release(&self) -> Result<(), StorageError> {
        self.proposals.delete(&self.token).await?;
        record_lock_release();
        tracing::debug!(target_key = %self.target(), token = %self.token, "Lock released");
        Ok(())
    }
}

impl Lock for StorageLock {
    fn acquire(&self) -> StorageFuture<'_, ()> {
        Box::pin(StorageLock::acquire(self))
    }

    fn release(&self) -> StorageFuture<'_, ()> {
        Box::pin(StorageLock::release(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::storage::{BlockingStorage, InMemoryStorage};
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn test_storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    fn target() -> Key {
        Key::new("a/b/c")
    }

    fn proposal_key(token: &str) -> Key {
        Proposals::root_key(&target()).child(token)
    }

    async fn registered(storage: &Arc<dyn Storage>) -> Vec<String> {
        storage
            .list(&Proposals::root_key(&target()))
            .await
            .unwrap()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect()
    }

    async fn value(storage: &Arc<dyn Storage>, key: &Key) -> Bytes {
        storage.load(key).await.unwrap().into_bytes().await.unwrap()
    }

    fn lock(storage: &Arc<dyn Storage>, token: &str, expiration: Expiration) -> StorageLock {
        StorageLock::with_token(Arc::clone(storage), target(), token, expiration).unwrap()
    }

    fn in_an_hour() -> Expiration {
        Expiration::At(Utc::now() + chrono::Duration::hours(1))
    }

    fn an_hour_ago() -> Expiration {
        Expiration::At(Utc::now() - chrono::Duration::hours(1))
    }

    /// Storage wrapper that can be told to fail list, load or delete calls,
    /// or to list a key that holds no entry.
    struct FailingStorage {
        inner: InMemoryStorage,
        fail_list: AtomicBool,
        fail_load: AtomicBool,
        fail_delete: AtomicBool,
        vanished: Mutex<Option<Key>>,
    }

    impl FailingStorage {
        fn new() -> Self {
            Self {
                inner: InMemoryStorage::new(),
                fail_list: AtomicBool::new(false),
                fail_load: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
                vanished: Mutex::new(None),
            }
        }
    }

    impl Storage for FailingStorage {
        fn save(&self, key: &Key, content: Content) -> StorageFuture<'_, ()> {
            self.inner.save(key, content)
        }

        fn load(&self, key: &Key) -> StorageFuture<'_, Content> {
            if self.fail_load.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err::<Content, _>(StorageError::from(anyhow::anyhow!("read failed")))
                });
            }
            self.inner.load(key)
        }

        fn exists(&self, key: &Key) -> StorageFuture<'_, bool> {
            self.inner.exists(key)
        }

        fn list(&self, prefix: &Key) -> StorageFuture<'_, Vec<Key>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err::<Vec<Key>, _>(StorageError::from(anyhow::anyhow!("list timed out")))
                });
            }
            let prefix = prefix.clone();
            Box::pin(async move {
                let mut keys = self.inner.list(&prefix).await?;
                let vanished = self.vanished.lock().unwrap().clone();
                if let Some(key) = vanished.filter(|k| prefix.contains(k)) {
                    keys.push(key);
                    keys.sort();
                }
                Ok(keys)
            })
        }

        fn delete(&self, key: &Key) -> StorageFuture<'_, ()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err::<(), _>(StorageError::from(anyhow::anyhow!("delete refused")))
                });
            }
            self.inner.delete(key)
        }

        fn size(&self, key: &Key) -> StorageFuture<'_, u64> {
            self.inner.size(key)
        }

        fn move_key(&self, source: &Key, destination: &Key) -> StorageFuture<'_, ()> {
            self.inner.move_key(source, destination)
        }
    }

    #[tokio::test]
    async fn test_acquire_writes_empty_value_without_expiration() {
        let storage = test_storage();
        let token = uuid::Uuid::new_v4().to_string();
        lock(&storage, &token, Expiration::Never).acquire().await.unwrap();
        assert!(value(&storage, &proposal_key(&token)).await.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_writes_expiration_instant() {
        let storage = test_storage();
        let token = uuid::Uuid::new_v4().to_string();
        let time = "2020-08-18T13:09:30.429Z";
        let expiration = Expiration::decode(time.as_bytes()).unwrap();
        lock(&storage, &token, expiration).acquire().await.unwrap();
        assert_eq!(
            value(&storage, &proposal_key(&token)).await,
            Bytes::from_static(time.as_bytes())
        );
    }

    #[tokio::test]
    async fn test_acquire_without_competitors_registers_only_self() {
        let storage = test_storage();
        let lock = StorageLock::new(Arc::clone(&storage), target());
        lock.acquire().await.unwrap();
        assert_eq!(
            registered(&storage).await,
            vec![proposal_key(lock.token()).as_str().to_string()]
        );
    }

    #[tokio::test]
    async fn test_acquire_when_own_value_present() {
        let storage = test_storage();
        let token = uuid::Uuid::new_v4().to_string();
        storage.save(&proposal_key(&token), Content::empty()).await.unwrap();
        lock(&storage, &token, Expiration::Never).acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_reacquire_own_token_ignores_prior_content() {
        let storage = test_storage();
        for prior in [
            Content::from(in_an_hour().encode()),
            Content::from("garbage"),
            Content::empty(),
        ] {
            storage.save(&proposal_key("me"), prior).await.unwrap();
            lock(&storage, "me", Expiration::Never).acquire().await.unwrap();
            assert!(value(&storage, &proposal_key("me")).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent_for_same_token() {
        let storage = test_storage();
        let lock = lock(&storage, "me", in_an_hour());
        lock.acquire().await.unwrap();
        lock.acquire().await.unwrap();
        assert_eq!(registered(&storage).await.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_fails_on_non_expiring_competitor() {
        let storage = test_storage();
        let other = proposal_key("other");
        storage.save(&other, Content::empty()).await.unwrap();

        let err = StorageLock::new(Arc::clone(&storage), target())
            .acquire()
            .await
            .unwrap_err();

        match err {
            StorageError::LockConflict { target: t, rollback } => {
                assert_eq!(t, target());
                assert!(rollback.is_none());
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
        assert_eq!(registered(&storage).await, vec![other.as_str().to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_fails_on_unexpired_competitor() {
        let storage = test_storage();
        let other = proposal_key("other");
        storage
            .save(&other, Content::from(in_an_hour().encode()))
            .await
            .unwrap();

        let err = StorageLock::new(Arc::clone(&storage), target())
            .acquire()
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(registered(&storage).await, vec![other.as_str().to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_succeeds_over_expired_competitor() {
        let storage = test_storage();
        let stale = proposal_key("stale");
        storage
            .save(&stale, Content::from(an_hour_ago().encode()))
            .await
            .unwrap();

        let lock = lock(&storage, "fresh", Expiration::Never);
        lock.acquire().await.unwrap();

        // The stale proposal is ignored, not cleaned up.
        assert_eq!(
            registered(&storage).await,
            vec![
                proposal_key("fresh").as_str().to_string(),
                stale.as_str().to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_acquire_fails_on_corrupt_competitor() {
        let storage = test_storage();
        storage
            .save(&proposal_key("other"), Content::from("yesterday-ish"))
            .await
            .unwrap();
        let err = lock(&storage, "me", Expiration::Never)
            .acquire()
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(!storage.exists(&proposal_key("me")).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_removes_proposal() {
        let storage = test_storage();
        let token = uuid::Uuid::new_v4().to_string();
        let proposal = proposal_key(&token);
        storage.save(&proposal, Content::empty()).await.unwrap();
        lock(&storage, &token, Expiration::Never).release().await.unwrap();
        assert!(!storage.exists(&proposal).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_without_proposal_succeeds() {
        let storage = test_storage();
        StorageLock::new(Arc::clone(&storage), target())
            .release()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_processes_take_turns() {
        let storage = test_storage();
        let x = lock(&storage, "x", Expiration::Never);
        let y = lock(&storage, "y", Expiration::Never);

        x.acquire().await.unwrap();
        assert_eq!(registered(&storage).await, vec![proposal_key("x").as_str().to_string()]);

        assert!(y.acquire().await.unwrap_err().is_conflict());
        assert_eq!(registered(&storage).await, vec![proposal_key("x").as_str().to_string()]);

        x.release().await.unwrap();
        assert!(registered(&storage).await.is_empty());

        y.acquire().await.unwrap();
        assert_eq!(registered(&storage).await, vec![proposal_key("y").as_str().to_string()]);
    }

    #[tokio::test]
    async fn test_separate_targets_do_not_conflict() {
        let storage = test_storage();
        StorageLock::new(Arc::clone(&storage), Key::new("a/b"))
            .acquire()
            .await
            .unwrap();
        StorageLock::new(Arc::clone(&storage), Key::new("a/b/c"))
            .acquire()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_failure_is_not_a_conflict() {
        let failing = Arc::new(FailingStorage::new());
        failing.fail_list.store(true, Ordering::SeqCst);
        let storage: Arc<dyn Storage> = failing.clone();

        let err = lock(&storage, "me", Expiration::Never)
            .acquire()
            .await
            .unwrap_err();

        assert_eq!(err.code(), "BackendFailure");
        assert!(!failing.inner.exists(&proposal_key("me")).await.unwrap());
    }

    #[tokio::test]
    async fn test_proposal_gone_before_load_is_not_a_conflict() {
        let failing = Arc::new(FailingStorage::new());
        *failing.vanished.lock().unwrap() = Some(proposal_key("released"));
        let storage: Arc<dyn Storage> = failing.clone();

        lock(&storage, "me", Expiration::Never).acquire().await.unwrap();

        assert!(failing.inner.exists(&proposal_key("me")).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_failure_is_not_a_conflict() {
        let failing = Arc::new(FailingStorage::new());
        let storage: Arc<dyn Storage> = failing.clone();
        storage.save(&proposal_key("other"), Content::empty()).await.unwrap();
        failing.fail_load.store(true, Ordering::SeqCst);

        let err = lock(&storage, "me", Expiration::Never)
            .acquire()
            .await
            .unwrap_err();

        assert_eq!(err.code(), "BackendFailure");
        assert!(!failing.inner.exists(&proposal_key("me")).await.unwrap());
        assert!(failing.inner.exists(&proposal_key("other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported_with_conflict() {
        let failing = Arc::new(FailingStorage::new());
        let storage: Arc<dyn Storage> = failing.clone();
        storage.save(&proposal_key("other"), Content::empty()).await.unwrap();
        failing.fail_delete.store(true, Ordering::SeqCst);

        let err = lock(&storage, "me", Expiration::Never)
            .acquire()
            .await
            .unwrap_err();

        match err {
            StorageError::LockConflict { rollback, .. } => {
                assert_eq!(rollback.expect("rollback failure").code(), "BackendFailure");
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
        // The residue is overwritten by a later attempt with the same token.
        assert!(failing.inner.exists(&proposal_key("me")).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_surfaces_backend_failure() {
        let failing = Arc::new(FailingStorage::new());
        failing.fail_delete.store(true, Ordering::SeqCst);
        let storage: Arc<dyn Storage> = failing.clone();
        let err = lock(&storage, "me", Expiration::Never)
            .release()
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BackendFailure");
    }

    #[tokio::test]
    async fn test_lock_trait_object() {
        let storage = test_storage();
        let lock: Box<dyn Lock> = Box::new(StorageLock::new(Arc::clone(&storage), target()));
        lock.acquire().await.unwrap();
        assert_eq!(registered(&storage).await.len(), 1);
        lock.release().await.unwrap();
        assert!(registered(&storage).await.is_empty());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let storage = test_storage();
        let err = StorageLock::with_token(storage, target(), "a/b", Expiration::Never)
            .err()
            .unwrap();
        assert_eq!(err.code(), "InvalidKey");
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let storage = test_storage();
        let first = StorageLock::new(Arc::clone(&storage), target());
        let second = StorageLock::new(storage, target());
        assert_ne!(first.token(), second.token());
        assert_eq!(first.expiration(), Expiration::Never);
    }

    #[test]
    fn test_proposal_visible_through_blocking_adapter() {
        let storage = test_storage();
        let blocking = BlockingStorage::new(Arc::clone(&storage)).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let lock = lock(&storage, "me", Expiration::Never);
        runtime.block_on(lock.acquire()).unwrap();
        assert_eq!(blocking.value(&proposal_key("me")).unwrap(), Bytes::new());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_contenders_at_most_one_wins() {
        let storage = test_storage();
        let mut handles = Vec::new();
        for i in 0..16 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let lock =
                    StorageLock::with_token(storage, target(), format!("t{i}"), Expiration::Never)
                        .unwrap();
                lock.acquire().await.map(|()| lock.token().to_string())
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(token) => winners.push(token),
                Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
            }
        }

        assert!(winners.len() <= 1);
        let expected: Vec<String> = winners
            .iter()
            .map(|t| proposal_key(t).as_str().to_string())
            .collect();
        assert_eq!(registered(&storage).await, expected);
    }
}
