//! Session persistence and lookup.
//!
//! Sessions are written as encrypted envelopes under
//! `atproto:session:<id>` with a plain `atproto:state:<token>` → id
//! mapping beside them. All multi-key writes for a session happen inside
//! the session's storage lock (`atproto:lock:session:<id>`, 30 s TTL).
//! Reads surface storage problems as "not found" after logging; writes
//! propagate their errors.

use std::sync::Arc;
use std::time::Duration;

use crate::envelope::{EnvelopeError, RecordCodec};
use crate::namespace;
use crate::session::Session;
use crate::storage::{LockError, Storage, StorageError, with_lock};

pub const RECORD_TYPE_SESSION: &str = "session";
pub const SESSION_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[derive(Clone)]
pub struct SessionRegistry {
    storage: Arc<dyn Storage>,
    codec: RecordCodec,
    session_ttl: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(storage: Arc<dyn Storage>, codec: RecordCodec) -> Self {
        Self {
            storage,
            codec,
            session_ttl: None,
        }
    }

    /// Let stored sessions lapse after `ttl` of inactivity.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn lock_key(session_id: &str) -> String {
        namespace::lock_key("session", session_id)
    }

    /// Persist a fresh session and its state mapping.
    pub async fn create(&self, session: &Session) -> Result<(), RegistryError> {
        let lock = Self::lock_key(&session.session_id);
        with_lock(self.storage.as_ref(), &lock, SESSION_LOCK_TTL, || {
            self.write(session)
        })
        .await
    }

    /// Persist session changes; the state mapping is rewritten every time.
    pub async fn update(&self, session: &Session) -> Result<(), RegistryError> {
        let lock = Self::lock_key(&session.session_id);
        with_lock(self.storage.as_ref(), &lock, SESSION_LOCK_TTL, || {
            self.write(session)
        })
        .await
    }

    /// The raw two-key write. Callers must hold the session lock; the
    /// session envelope goes first so a reader who finds the state
    /// mapping without the session treats the pair as absent.
    pub(crate) async fn write(&self, session: &Session) -> Result<(), RegistryError> {
        let sealed = self.codec.seal(RECORD_TYPE_SESSION, session)?;
        self.storage
            .set(
                &namespace::session_key(&session.session_id),
                sealed,
                self.session_ttl,
            )
            .await?;
        self.storage
            .set(
                &namespace::state_key(&session.state_token),
                session.session_id.clone(),
                self.session_ttl,
            )
            .await?;
        Ok(())
    }

    /// Load a session. Sessions whose tokens are expired and not
    /// renewable read as gone; storage and decryption failures are
    /// logged and read as absent.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let key = namespace::session_key(session_id);
        let raw = match self.storage.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::error!(session_id, error = %e, "session read failed");
                return None;
            }
        };
        let session = match self.codec.open::<Session>(RECORD_TYPE_SESSION, &raw) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(session_id, error = %e, "session record corrupt");
                return None;
            }
        };
        if let Some(tokens) = &session.tokens {
            if tokens.expired() && !tokens.renewable() {
                tracing::debug!(session_id, "session tokens expired and unrenewable");
                return None;
            }
        }
        Some(session)
    }

    /// Look a session up by its state token.
    pub async fn get_by_state(&self, state_token: &str) -> Option<Session> {
        let session_id = match self.storage.get(&namespace::state_key(state_token)).await {
            Ok(id) => id?,
            Err(e) => {
                tracing::error!(error = %e, "state lookup failed");
                return None;
            }
        };
        self.get(&session_id).await
    }

    /// Delete the session and its state mapping under the session lock.
    pub async fn remove(&self, session_id: &str) -> Result<(), RegistryError> {
        let lock = Self::lock_key(session_id);
        with_lock(self.storage.as_ref(), &lock, SESSION_LOCK_TTL, || async {
            // Read without the liveness filter so stale sessions still
            // clean up their state mapping.
            if let Ok(Some(raw)) = self.storage.get(&namespace::session_key(session_id)).await {
                if let Ok(session) = self.codec.open::<Session>(RECORD_TYPE_SESSION, &raw) {
                    self.storage
                        .delete(&namespace::state_key(&session.state_token))
                        .await?;
                }
            }
            self.storage.delete(&namespace::session_key(session_id)).await?;
            Ok(())
        })
        .await
    }
}
