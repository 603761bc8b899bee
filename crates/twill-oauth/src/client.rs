//! The public client facade: authorize, callback, authenticated
//! headers, refresh, sign-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use url::Url;

use twill_common::HttpClient;
use twill_identity::resolver::pds_url_from_doc;
use twill_identity::{Did, Handle, IdentityResolver, ResolverOptions, TwillResolver};

use crate::config::OAuthConfig;
use crate::crypto::CryptoService;
use crate::dpop::{DpopClient, DpopError, DpopKey, NonceManager};
use crate::envelope::RecordCodec;
use crate::error::{OAuthError, Result};
use crate::namespace;
use crate::metadata::{
    SCOPE_ATPROTO, fetch_authorization_server, fetch_resource_server, verify_issuer_binding,
};
use crate::registry::{SESSION_LOCK_TTL, SessionRegistry};
use crate::request::{
    RequestContext, authorization_url, exchange_code, push_authorization, revoke,
};
use crate::session::Session;
use crate::storage::{Storage, with_lock};
use crate::types::{
    AuthorizeOptions, CallbackParams, CodeChallengeMethod, ParParameters, ResponseType, TokenSet,
};

const RECORD_TYPE_DPOP_KEY: &str = "dpop_key";

/// Where to send the user's browser, and the session that awaits them.
#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub url: Url,
    pub session_id: String,
}

/// What a completed callback yields.
#[derive(Debug, Clone)]
pub struct TokenSummary {
    pub session_id: String,
    pub did: Did,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

/// AT Protocol OAuth client.
///
/// One instance serves many concurrent sessions; all per-session state
/// lives in storage, encrypted, and mutations are serialized by storage
/// locks.
pub struct OAuthClient<H: HttpClient, R: IdentityResolver = TwillResolver<Arc<H>>> {
    config: OAuthConfig,
    http: Arc<H>,
    storage: Arc<dyn Storage>,
    registry: SessionRegistry,
    resolver: R,
    dpop: DpopClient,
}

impl<H: HttpClient> OAuthClient<H, TwillResolver<Arc<H>>> {
    /// Assemble a client with the default resolver (DNS TXT enabled) and
    /// the master key from the environment.
    pub async fn connect(
        config: OAuthConfig,
        http: H,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let http = Arc::new(http);
        let resolver = TwillResolver::with_options(
            http.clone(),
            ResolverOptions {
                plc_directory: config.plc_directory.clone(),
                ..ResolverOptions::default()
            },
        )
        .with_system_dns();
        let crypto = Arc::new(CryptoService::from_env()?);
        Self::with_parts(config, http, storage, resolver, crypto).await
    }
}

impl<H: HttpClient, R: IdentityResolver> OAuthClient<H, R> {
    /// Assemble a client from explicit parts. The client DPoP keypair is
    /// reloaded from storage when one was persisted, so outstanding
    /// DPoP-bound tokens survive restarts.
    pub async fn with_parts(
        config: OAuthConfig,
        http: Arc<H>,
        storage: Arc<dyn Storage>,
        resolver: R,
        crypto: Arc<CryptoService>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = RecordCodec::new(crypto);
        let registry = SessionRegistry::new(storage.clone(), codec.clone());
        let key = Self::load_or_create_dpop_key(
            storage.as_ref(),
            &codec,
            &config.client_metadata.client_id,
        )
        .await?;
        let nonces = NonceManager::new(storage.clone(), codec, config.dpop_nonce_lifetime);
        Ok(Self {
            config,
            http,
            storage,
            registry,
            resolver,
            dpop: DpopClient::new(key, nonces),
        })
    }

    async fn load_or_create_dpop_key(
        storage: &dyn Storage,
        codec: &RecordCodec,
        client_id: &Url,
    ) -> Result<DpopKey> {
        let key_name = namespace::dpop_key(client_id.as_str());
        match storage.get(&key_name).await {
            Ok(Some(raw)) => match codec.open::<jose_jwk::Jwk>(RECORD_TYPE_DPOP_KEY, &raw) {
                Ok(jwk) => {
                    return Ok(DpopKey::from_jwk(&jwk).map_err(DpopError::from)?);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stored DPoP key unreadable, rotating");
                }
            },
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "DPoP key read failed, rotating"),
        }
        let key = DpopKey::generate().map_err(DpopError::from)?;
        let sealed = codec
            .seal(RECORD_TYPE_DPOP_KEY, &key.to_private_jwk())
            .map_err(DpopError::from)?;
        storage.set(&key_name, sealed, None).await?;
        Ok(key)
    }

    fn request_context<'a>(
        &'a self,
        server: &'a crate::types::AuthorizationServerMetadata,
    ) -> RequestContext<'a> {
        RequestContext {
            server,
            client: &self.config.client_metadata,
            keyset: self.config.keyset.as_ref(),
            assertion_lifetime: self.config.default_token_lifetime,
        }
    }

    /// Start a login. Exactly one of `handle`/`pds_url` selects the
    /// account; the scope defaults to `atproto`. Returns the
    /// authorization URL to redirect the user to.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn authorize(&self, options: AuthorizeOptions) -> Result<AuthorizeOutcome> {
        let scope = options
            .scope
            .unwrap_or_else(|| SCOPE_ATPROTO.to_owned());
        if !scope.split_ascii_whitespace().any(|s| s == SCOPE_ATPROTO) {
            return Err(OAuthError::InvalidRequest(format!(
                "scope must include `atproto`, got {scope:?}"
            )));
        }
        let (handle, pds_url) = match (&options.handle, &options.pds_url) {
            (Some(handle), None) => (Some(Handle::new(handle).map_err(|e| {
                OAuthError::Identity(e.into())
            })?), None),
            (None, Some(pds)) => (None, Some(pds.clone())),
            _ => {
                return Err(OAuthError::InvalidRequest(
                    "exactly one of handle or pds_url is required".into(),
                ));
            }
        };

        let mut session = Session::new(self.config.client_metadata.client_id.clone(), scope)?;
        self.registry.create(&session).await?;

        // Resolve the account (or just the service) down to an
        // authorization server and bind it to the session.
        let pds = match &handle {
            Some(handle) => {
                let (did, doc) = self.resolver.resolve_identity(handle).await?;
                session.bind_did(did)?;
                pds_url_from_doc(&doc)?
            }
            None => pds_url.expect("checked above"),
        };
        let issuer = fetch_resource_server(self.http.as_ref(), &pds).await?;
        let server = fetch_authorization_server(self.http.as_ref(), &issuer).await?;
        session.bind_auth_server(server.clone())?;

        let login_hint = options
            .login_hint
            .or_else(|| handle.as_ref().map(|h| h.as_str().to_owned()));
        let parameters = ParParameters {
            response_type: ResponseType::Code,
            redirect_uri: self.config.client_metadata.redirect_uris[0].clone(),
            code_challenge: session.pkce_challenge.clone(),
            code_challenge_method: CodeChallengeMethod::S256,
            state: session.state_token.clone(),
            scope: session.scope.clone(),
            login_hint,
            nonce: options.nonce,
            prompt: options.prompt,
        };
        let ctx = self.request_context(&server);
        let par = push_authorization(self.http.as_ref(), &self.dpop, &ctx, parameters).await?;

        self.registry.update(&session).await?;
        let url = authorization_url(
            &server.authorization_endpoint,
            par.request_uri.as_str(),
            &self.config.client_metadata.client_id,
        )?;
        tracing::info!(session_id = %session.session_id, "authorization request pushed");
        Ok(AuthorizeOutcome {
            url,
            session_id: session.session_id,
        })
    }

    /// Complete the callback: exchange the code and persist the tokens.
    /// On failure the session stays put so the caller may retry or
    /// discard it.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<TokenSummary> {
        let mut session = self
            .registry
            .get_by_state(&params.state)
            .await
            .ok_or(OAuthError::InvalidState)?;
        let Some(server) = session.auth_server.clone() else {
            return Err(OAuthError::InvalidState);
        };
        let expected = twill_identity::types::normalize_service_url(&server.issuer);
        let got = Url::parse(&params.iss)
            .map(|u| twill_identity::types::normalize_service_url(&u))
            .unwrap_or_else(|_| params.iss.clone());
        if expected != got {
            return Err(OAuthError::IssuerMismatch { expected, got });
        }

        let lock = SessionRegistry::lock_key(&session.session_id);
        let ctx = self.request_context(&server);
        let redirect_uri = self.config.client_metadata.redirect_uris[0].clone();
        let summary = with_lock(
            self.storage.as_ref(),
            &lock,
            SESSION_LOCK_TTL,
            || async {
                let tokens = exchange_code(
                    self.http.as_ref(),
                    &self.dpop,
                    &ctx,
                    &params.code,
                    &redirect_uri,
                    &session.pkce_verifier,
                    session.did.as_ref(),
                    &session.scope,
                )
                .await?;
                if session.did.is_none() {
                    // PDS-initiated flow: the subject arrived with the
                    // token response, so its issuer authority must be
                    // checked before we trust it.
                    let doc = self.resolver.get_did_info(&tokens.sub).await?;
                    let pds = pds_url_from_doc(&doc)?;
                    verify_issuer_binding(self.http.as_ref(), &pds, &server.issuer).await?;
                }
                session.set_tokens(tokens)?;
                self.registry.write(&session).await?;
                let tokens = session.tokens.as_ref().expect("just set");
                Ok::<TokenSummary, OAuthError>(TokenSummary {
                    session_id: session.session_id.clone(),
                    did: tokens.sub.clone(),
                    scope: tokens.scope.clone(),
                    expires_at: tokens.expires_at,
                })
            },
        )
        .await?;
        tracing::info!(session_id = %summary.session_id, did = %summary.did, "callback complete");
        Ok(summary)
    }

    /// Headers for an authenticated request: `Authorization: DPoP <token>`
    /// plus a proof bound to the token (`ath`), method, and URL.
    pub async fn auth_headers(
        &self,
        session_id: &str,
        method: &str,
        url: &Url,
    ) -> Result<HeaderMap> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| OAuthError::SessionNotFound(session_id.to_owned()))?;
        if !session.authorized() {
            return Err(OAuthError::NotAuthorized(session_id.to_owned()));
        }
        let tokens = session.tokens.as_ref().expect("authorized implies tokens");
        let proof = self
            .dpop
            .generate_proof(method, url, Some(&tokens.access_token), None)
            .await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("DPoP {}", tokens.access_token)
                .parse()
                .map_err(DpopError::Header)?,
        );
        headers.insert("DPoP", proof.parse().map_err(DpopError::Header)?);
        Ok(headers)
    }

    /// Whether the session currently holds a live access token.
    pub async fn authorized(&self, session_id: &str) -> bool {
        self.registry
            .get(session_id)
            .await
            .is_some_and(|s| s.authorized())
    }

    /// The session's current tokens, if any.
    pub async fn get_tokens(&self, session_id: &str) -> Option<TokenSet> {
        self.registry.get(session_id).await.and_then(|s| s.tokens)
    }

    /// Refresh the session's tokens under its lock and persist the
    /// result. See [`crate::refresh`] for the retry policy.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn refresh_token(&self, session_id: &str) -> Result<TokenSet> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| OAuthError::SessionNotFound(session_id.to_owned()))?;
        if !session.renewable() {
            return Err(OAuthError::NotAuthorized(session_id.to_owned()));
        }
        let Some(server) = session.auth_server.clone() else {
            return Err(OAuthError::NotAuthorized(session_id.to_owned()));
        };

        let lock = SessionRegistry::lock_key(session_id);
        let ctx = self.request_context(&server);
        with_lock(
            self.storage.as_ref(),
            &lock,
            SESSION_LOCK_TTL,
            || async {
                // Re-read under the lock: a concurrent refresh may have
                // already rotated the tokens.
                let mut session = self
                    .registry
                    .get(session_id)
                    .await
                    .ok_or_else(|| OAuthError::SessionNotFound(session_id.to_owned()))?;
                let Some(current) = session.tokens.clone() else {
                    return Err(OAuthError::NotAuthorized(session_id.to_owned()));
                };
                let refreshed = crate::refresh::refresh_tokens(
                    self.http.as_ref(),
                    &self.dpop,
                    &ctx,
                    &current,
                )
                .await?;
                session.set_tokens(refreshed.clone())?;
                self.registry.write(&session).await?;
                Ok(refreshed)
            },
        )
        .await
    }

    /// Send an authenticated request on behalf of a session: attaches
    /// `Authorization: DPoP …` plus a proof, absorbs nonce rotations,
    /// and when the server reports the access token invalid, refreshes
    /// once and replays the request.
    pub async fn send_authenticated(
        &self,
        session_id: &str,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| OAuthError::SessionNotFound(session_id.to_owned()))?;
        if !session.authorized() {
            return Err(OAuthError::NotAuthorized(session_id.to_owned()));
        }
        let access_token = session
            .tokens
            .as_ref()
            .expect("authorized implies tokens")
            .access_token
            .clone();

        let retry_request = request.clone();
        let response = self.send_with_token(&access_token, request).await?;
        if !is_invalid_token_response(&response) || !session.renewable() {
            return Ok(response);
        }
        // The server no longer accepts the token; rotate and replay once.
        let refreshed = self.refresh_token(session_id).await?;
        self.send_with_token(&refreshed.access_token, retry_request)
            .await
    }

    async fn send_with_token(
        &self,
        token: &str,
        mut request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>> {
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            format!("DPoP {token}").parse().map_err(DpopError::Header)?,
        );
        Ok(self
            .dpop
            .send(self.http.as_ref(), request, Some(token))
            .await?)
    }

    /// Sign out: best-effort token revocation, then delete the session.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.registry.get(session_id).await {
            if let (Some(server), Some(tokens)) = (&session.auth_server, &session.tokens) {
                let ctx = self.request_context(server);
                if let Err(e) =
                    revoke(self.http.as_ref(), &self.dpop, &ctx, &tokens.access_token).await
                {
                    tracing::warn!(session_id, error = %e, "token revocation failed");
                }
            }
        }
        self.registry.remove(session_id).await?;
        Ok(())
    }
}

/// The resource server rejected the access token itself (as opposed to
/// demanding a fresh nonce): 401 with an `invalid_token` challenge.
fn is_invalid_token_response(response: &http::Response<Vec<u8>>) -> bool {
    if response.status() != http::StatusCode::UNAUTHORIZED {
        return false;
    }
    response
        .headers()
        .get("WWW-Authenticate")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|www| {
            (www.starts_with("DPoP") || www.starts_with("Bearer"))
                && www.contains(r#"error="invalid_token""#)
        })
}
