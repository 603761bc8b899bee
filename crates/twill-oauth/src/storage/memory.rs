//! In-process storage backend for development and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Storage, StorageError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Mutex-guarded map with lazy TTL expiry. Locks are ordinary entries, so
/// the acquire check-and-insert is atomic under the map mutex.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(value: String, ttl: Option<Duration>) -> Entry {
        Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), Self::entry(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let mut entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| match entries.get(*key) {
                Some(entry) if entry.expired() => {
                    entries.remove(*key);
                    None
                }
                Some(entry) => Some(entry.value.clone()),
                None => None,
            })
            .collect())
    }

    async fn multi_set(
        &self,
        pairs: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        for (key, value) in pairs {
            entries.insert(key, Self::entry(value, ttl));
        }
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => Ok(false),
            _ => {
                entries.insert(key.to_owned(), Self::entry("1".to_owned(), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> Result<(), StorageError> {
        self.delete(key).await
    }
}
