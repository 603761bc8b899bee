//! Abstract key/value storage with TTLs, batched operations, and
//! expiring locks.
//!
//! All session, nonce, and key state goes through this interface; the
//! crate ships an in-process [`memory::MemoryStorage`] and, behind the
//! `redis-store` feature, a [`redis::RedisStorage`] backend.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StorageError {
    #[error("storage backend error")]
    #[diagnostic(code(twill_oauth::storage::backend))]
    Backend(#[source] BoxError),

    #[error("storage backend unavailable: {0}")]
    #[diagnostic(code(twill_oauth::storage::unavailable))]
    Unavailable(String),
}

impl StorageError {
    pub fn backend(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(source))
    }
}

/// Failure to win a storage lock before the wait budget ran out.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("could not acquire lock {key} within {waited:?}")]
#[diagnostic(
    code(twill_oauth::storage::lock),
    help("another flow holds this lock; it expires with its TTL")
)]
pub struct LockError {
    pub key: String,
    pub waited: Duration,
}

/// Process-wide key/value store.
///
/// Implementations must be safe for concurrent use, honor per-key TTLs,
/// and provide an atomic test-and-set for [`Storage::acquire_lock`]
/// (`SET NX PX` in Redis, a mutex-guarded map entry in memory). Expired
/// entries read as absent.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError>;

    async fn multi_set(
        &self,
        entries: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Returns `true` when the lock was won. The lock expires after `ttl`
    /// so a crashed holder cannot deadlock the key.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    async fn release_lock(&self, key: &str) -> Result<(), StorageError>;
}

/// Poll interval while waiting for a contended lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Run `body` while holding `key`, releasing on every exit path.
///
/// Waits up to `ttl` for a contended lock before giving up with
/// [`LockError`]. A failed release is logged and swallowed: the lock's
/// TTL bounds the damage, and the body's result is what the caller needs.
pub async fn with_lock<S, T, E, F, Fut>(
    storage: &S,
    key: &str,
    ttl: Duration,
    body: F,
) -> Result<T, E>
where
    S: Storage + ?Sized,
    E: From<StorageError> + From<LockError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = tokio::time::Instant::now() + ttl;
    loop {
        if storage.acquire_lock(key, ttl).await? {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LockError {
                key: key.to_owned(),
                waited: ttl,
            }
            .into());
        }
        tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
    }
    let result = body().await;
    if let Err(e) = storage.release_lock(key).await {
        tracing::error!(key, error = %e, "failed to release storage lock");
    }
    result
}
