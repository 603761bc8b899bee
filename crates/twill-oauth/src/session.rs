//! Per-flow session state and its invariants.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::ThreadRng;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use twill_identity::Did;

use crate::pkce::{self, PkceError};
use crate::types::{AuthorizationServerMetadata, TokenSet};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SessionError {
    #[error("session is bound to issuer {current}, refusing {attempted}")]
    #[diagnostic(
        code(twill_oauth::session::issuer_rebind),
        help("a session never migrates between authorization servers")
    )]
    IssuerRebind { current: Url, attempted: Url },

    #[error("session is bound to {current}, refusing {attempted}")]
    #[diagnostic(code(twill_oauth::session::did_rebind))]
    DidRebind { current: Did, attempted: Did },

    #[error("token subject {sub} does not match session DID {did}")]
    #[diagnostic(code(twill_oauth::session::subject_mismatch))]
    SubjectMismatch { sub: Did, did: Did },
}

/// State for one authorization flow, from `authorize` through token
/// lifetime. Mutations go through the binding methods below, which
/// enforce:
///
/// - `auth_server`, once set, never moves to a different issuer
/// - `did`, once set, never changes
/// - stored tokens always satisfy `tokens.sub == did`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub state_token: String,
    pub client_id: Url,
    pub scope: String,
    pub pkce_verifier: String,
    pub pkce_challenge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_server: Option<AuthorizationServerMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<Did>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
}

impl Session {
    /// Fresh session with random id, state token, and PKCE pair.
    pub fn new(client_id: Url, scope: impl Into<String>) -> Result<Self, PkceError> {
        let (pkce_verifier, pkce_challenge) = pkce::generate_pair()?;
        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            state_token: generate_state_token(),
            client_id,
            scope: scope.into(),
            pkce_verifier,
            pkce_challenge,
            auth_server: None,
            did: None,
            tokens: None,
        })
    }

    pub fn issuer(&self) -> Option<&Url> {
        self.auth_server.as_ref().map(|m| &m.issuer)
    }

    /// Bind the authorization server. Re-binding is only allowed for the
    /// same issuer (refreshed metadata).
    pub fn bind_auth_server(
        &mut self,
        metadata: AuthorizationServerMetadata,
    ) -> Result<(), SessionError> {
        if let Some(current) = self.issuer() {
            if *current != metadata.issuer {
                return Err(SessionError::IssuerRebind {
                    current: current.clone(),
                    attempted: metadata.issuer,
                });
            }
        }
        self.auth_server = Some(metadata);
        Ok(())
    }

    /// Bind the account DID. Idempotent for the same value.
    pub fn bind_did(&mut self, did: Did) -> Result<(), SessionError> {
        if let Some(current) = &self.did {
            if *current != did {
                return Err(SessionError::DidRebind {
                    current: current.clone(),
                    attempted: did,
                });
            }
        }
        self.did = Some(did);
        Ok(())
    }

    /// Store a token set. The token subject must match a bound DID; an
    /// unbound session adopts the subject as its DID.
    pub fn set_tokens(&mut self, tokens: TokenSet) -> Result<(), SessionError> {
        match &self.did {
            Some(did) if *did != tokens.sub => {
                return Err(SessionError::SubjectMismatch {
                    sub: tokens.sub,
                    did: did.clone(),
                });
            }
            Some(_) => {}
            None => self.did = Some(tokens.sub.clone()),
        }
        self.tokens = Some(tokens);
        Ok(())
    }

    /// Authorized ⟺ tokens present and not expired.
    pub fn authorized(&self) -> bool {
        self.tokens.as_ref().is_some_and(|t| !t.expired())
    }

    /// Renewable ⟺ tokens present with a usable refresh token.
    pub fn renewable(&self) -> bool {
        self.tokens.as_ref().is_some_and(TokenSet::renewable)
    }
}

/// ≥256-bit URL-safe random state token.
fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    ThreadRng::default().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
