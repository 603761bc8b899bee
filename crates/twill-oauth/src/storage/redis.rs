//! Redis storage backend.
//!
//! Uses a [`ConnectionManager`] so the handle is cheap to clone and
//! reconnects transparently. Locks rely on `SET NX PX` for atomicity.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{Storage, StorageError};

pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(StorageError::backend)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(StorageError::backend)?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(StorageError::backend)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(StorageError::backend)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(StorageError::backend)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(StorageError::backend)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(StorageError::backend)
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(StorageError::backend)
    }

    async fn multi_set(
        &self,
        pairs: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value) in &pairs {
            match ttl {
                Some(ttl) => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(ttl.as_secs().max(1))
                        .ignore();
                }
                None => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
            }
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(StorageError::backend)?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(StorageError::backend)?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), StorageError> {
        self.delete(key).await
    }
}
