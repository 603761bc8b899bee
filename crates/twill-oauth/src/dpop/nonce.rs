//! Per-server DPoP nonce bookkeeping.
//!
//! Authorization and resource servers rotate nonces via the `DPoP-Nonce`
//! response header; we remember the latest value per canonical server
//! origin so the next proof can carry it. Values live in storage under a
//! TTL; last writer wins, which is fine for single-use hints.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::envelope::RecordCodec;
use crate::namespace;
use crate::origin::server_origin;
use crate::storage::Storage;

use super::DpopError;

pub const RECORD_TYPE_NONCE: &str = "dpop_nonce";
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNonce {
    pub value: String,
    pub server_url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NonceManager {
    storage: Arc<dyn Storage>,
    codec: RecordCodec,
    ttl: Duration,
}

impl NonceManager {
    pub fn new(storage: Arc<dyn Storage>, codec: RecordCodec, ttl: Duration) -> Self {
        Self {
            storage,
            codec,
            ttl,
        }
    }

    /// Remember `nonce` for the server that owns `server_url`.
    pub async fn update(&self, nonce: &str, server_url: &Url) -> Result<(), DpopError> {
        let origin = server_origin(server_url)?;
        let record = StoredNonce {
            value: nonce.to_owned(),
            server_url: origin.clone(),
            timestamp: Utc::now(),
        };
        let sealed = self.codec.seal(RECORD_TYPE_NONCE, &record)?;
        self.storage
            .set(&namespace::nonce_key(&origin), sealed, Some(self.ttl))
            .await?;
        tracing::debug!(%origin, "stored DPoP nonce");
        Ok(())
    }

    /// The last unexpired nonce for the server, if any. Storage expires
    /// entries by TTL; read failures are logged and read as absent.
    pub async fn get(&self, server_url: &Url) -> Option<String> {
        let origin = server_origin(server_url).ok()?;
        let raw = match self.storage.get(&namespace::nonce_key(&origin)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::error!(%origin, error = %e, "nonce read failed");
                return None;
            }
        };
        match self.codec.open::<StoredNonce>(RECORD_TYPE_NONCE, &raw) {
            Ok(record) => Some(record.value),
            Err(e) => {
                tracing::error!(%origin, error = %e, "nonce record corrupt");
                None
            }
        }
    }
}
