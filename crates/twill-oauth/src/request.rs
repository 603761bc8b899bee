//! Endpoint calls against the authorization server: PAR submission,
//! authorization-code exchange, and token revocation.
//!
//! Every call POSTs a form body wrapped in the client-authentication
//! payload (client_id plus an optional RFC 7523 assertion), carries a
//! DPoP proof, and absorbs `use_dpop_nonce` rechallenges exactly once
//! via [`DpopClient::send`].

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use http::{Method, Request, StatusCode};
use serde::Serialize;
use smol_str::SmolStr;
use url::Url;

use twill_identity::Did;

use crate::assertion::{CLIENT_ASSERTION_TYPE_JWT_BEARER, Keyset, KeysetError};
use crate::dpop::{DpopClient, DpopError};
use crate::metadata::SCOPE_ATPROTO;
use crate::types::{
    AuthorizationServerMetadata, ClientMetadata, GrantType, OAuthErrorBody, ParParameters,
    ParResponse, RefreshRequestParameters, RevocationRequestParameters, TokenRequestParameters,
    TokenResponse, TokenSet, TokenType,
};

use twill_common::HttpClient;

/// `PARError`: the current authorize flow cannot continue.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ParError {
    #[error("server does not advertise a pushed authorization request endpoint")]
    #[diagnostic(code(twill_oauth::par::no_endpoint))]
    NoEndpoint,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] DpopError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Keyset(#[from] KeysetError),

    #[error("PAR form serialization failed")]
    #[diagnostic(code(twill_oauth::par::form))]
    Form(#[from] serde_html_form::ser::Error),

    #[error("PAR rejected with HTTP {status}: {}", describe(.error, .description))]
    #[diagnostic(code(twill_oauth::par::rejected))]
    Rejected {
        status: StatusCode,
        error: Option<SmolStr>,
        description: Option<String>,
    },

    #[error("PAR response is malformed")]
    #[diagnostic(code(twill_oauth::par::malformed))]
    Malformed(#[source] serde_json::Error),

    #[error("PAR request_uri lifetime must be positive, got {0}")]
    #[diagnostic(code(twill_oauth::par::expires_in))]
    NonPositiveLifetime(i64),
}

/// `TokenError`: the token endpoint refused us or returned something we
/// must not trust.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TokenError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] DpopError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Keyset(#[from] KeysetError),

    #[error("token request form serialization failed")]
    #[diagnostic(code(twill_oauth::token::form))]
    Form(#[from] serde_html_form::ser::Error),

    #[error("token request rejected with HTTP {status}: {}", describe(.error, .description))]
    #[diagnostic(code(twill_oauth::token::rejected))]
    Rejected {
        status: StatusCode,
        error: Option<SmolStr>,
        description: Option<String>,
    },

    #[error("token response is malformed")]
    #[diagnostic(code(twill_oauth::token::malformed))]
    Malformed(#[source] serde_json::Error),

    #[error("token response is missing `{0}`")]
    #[diagnostic(code(twill_oauth::token::missing_field))]
    MissingField(&'static str),

    #[error("access token is not DPoP-bound")]
    #[diagnostic(code(twill_oauth::token::not_dpop))]
    NotDpopBound,

    #[error("granted scope must include `atproto`")]
    #[diagnostic(code(twill_oauth::token::scope))]
    ScopeMissingAtproto,

    #[error("granted scope {granted:?} exceeds requested {requested:?}")]
    #[diagnostic(code(twill_oauth::token::scope_superset))]
    ScopeNotSubset { granted: String, requested: String },

    #[error("Subject mismatch: token sub {sub} is not {expected}")]
    #[diagnostic(code(twill_oauth::token::subject_mismatch))]
    SubjectMismatch { sub: SmolStr, expected: Did },

    #[error("token subject is not a valid DID")]
    #[diagnostic(code(twill_oauth::token::subject_invalid))]
    InvalidSubject(#[source] twill_identity::types::IdentifierError),
}

fn describe(error: &Option<SmolStr>, description: &Option<String>) -> String {
    match (description, error) {
        (Some(description), _) => description.clone(),
        (None, Some(error)) => error.to_string(),
        (None, None) => "no error body".to_owned(),
    }
}

/// Everything an endpoint call needs to authenticate itself.
pub struct RequestContext<'a> {
    pub server: &'a AuthorizationServerMetadata,
    pub client: &'a ClientMetadata,
    pub keyset: Option<&'a Keyset>,
    /// Lifetime of minted client assertions.
    pub assertion_lifetime: Duration,
}

#[derive(Serialize)]
struct RequestPayload<'a, T: Serialize> {
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_assertion_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_assertion: Option<String>,
    #[serde(flatten)]
    parameters: T,
}

#[derive(Debug, thiserror::Error)]
enum BuildFormError {
    #[error(transparent)]
    Keyset(#[from] KeysetError),
    #[error(transparent)]
    Form(#[from] serde_html_form::ser::Error),
}

impl From<BuildFormError> for ParError {
    fn from(e: BuildFormError) -> Self {
        match e {
            BuildFormError::Keyset(e) => ParError::Keyset(e),
            BuildFormError::Form(e) => ParError::Form(e),
        }
    }
}

impl From<BuildFormError> for TokenError {
    fn from(e: BuildFormError) -> Self {
        match e {
            BuildFormError::Keyset(e) => TokenError::Keyset(e),
            BuildFormError::Form(e) => TokenError::Form(e),
        }
    }
}

/// Serialize the form body, adding `client_assertion` +
/// `client_assertion_type` together when the client is confidential.
fn build_form<T: Serialize>(
    ctx: &RequestContext<'_>,
    parameters: T,
) -> Result<String, BuildFormError> {
    let assertion = if ctx.client.is_confidential() {
        let keyset = ctx.keyset.ok_or(KeysetError::Empty)?;
        if crate::assertion::negotiate_signing_alg(
            &ctx.server.token_endpoint_auth_signing_alg_values_supported,
        )
        .is_none()
        {
            return Err(KeysetError::NoSupportedAlgorithm.into());
        }
        Some(keyset.create_assertion(
            &ctx.client.client_id,
            &ctx.server.issuer,
            ctx.assertion_lifetime,
        )?)
    } else {
        None
    };
    Ok(serde_html_form::to_string(RequestPayload {
        client_id: ctx.client.client_id.as_str(),
        client_assertion_type: assertion.as_ref().map(|_| CLIENT_ASSERTION_TYPE_JWT_BEARER),
        client_assertion: assertion,
        parameters,
    })?)
}

fn form_request(url: &Url, body: String) -> Request<Vec<u8>> {
    Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body.into_bytes())
        .expect("valid request")
}

fn parse_error_body(body: &[u8]) -> OAuthErrorBody {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Submit a pushed authorization request. Expected success is HTTP 201
/// with a positive `expires_in`; a `use_dpop_nonce` rejection has
/// already been retried once by the DPoP layer before we see it.
#[tracing::instrument(level = "debug", skip_all, fields(issuer = %ctx.server.issuer))]
pub async fn push_authorization<H: HttpClient>(
    http: &H,
    dpop: &DpopClient,
    ctx: &RequestContext<'_>,
    parameters: ParParameters,
) -> Result<ParResponse, ParError> {
    let endpoint = ctx
        .server
        .pushed_authorization_request_endpoint
        .as_ref()
        .ok_or(ParError::NoEndpoint)?;
    let body = build_form(ctx, parameters)?;
    let response = dpop.send(http, form_request(endpoint, body), None).await?;

    if response.status() != StatusCode::CREATED {
        let error = parse_error_body(response.body());
        return Err(ParError::Rejected {
            status: response.status(),
            error: error.error,
            description: error.error_description,
        });
    }
    let parsed: ParResponse =
        serde_json::from_slice(response.body()).map_err(ParError::Malformed)?;
    if parsed.expires_in <= 0 {
        return Err(ParError::NonPositiveLifetime(parsed.expires_in));
    }
    Ok(parsed)
}

/// `authorize_endpoint?request_uri=…&client_id=…`
pub fn authorization_url(
    authorize_endpoint: &Url,
    request_uri: &str,
    client_id: &Url,
) -> Result<Url, serde_html_form::ser::Error> {
    #[derive(Serialize)]
    struct Parameters<'a> {
        request_uri: &'a str,
        client_id: &'a str,
    }
    let query = serde_html_form::to_string(Parameters {
        request_uri,
        client_id: client_id.as_str(),
    })?;
    let mut url = authorize_endpoint.clone();
    url.set_query(Some(&query));
    Ok(url)
}

/// How the granted scope is held against a reference scope.
#[derive(Debug, Clone, Copy)]
pub enum ScopeRule<'a> {
    /// Code exchange: the grant may not exceed what was requested.
    WithinRequested(&'a str),
    /// Refresh: the grant must cover everything the session already had.
    CoversOriginal(&'a str),
}

/// Hold a token response to the profile and turn it into a [`TokenSet`].
///
/// `expected_did` enforces the session's DID when one is already bound;
/// `scope_rule` bounds the grant.
pub fn validate_token_response(
    response: TokenResponse,
    expected_did: Option<&Did>,
    scope_rule: ScopeRule<'_>,
) -> Result<TokenSet, TokenError> {
    if response.access_token.is_empty() {
        return Err(TokenError::MissingField("access_token"));
    }
    if response.token_type != TokenType::DPoP {
        return Err(TokenError::NotDpopBound);
    }
    let Some(expires_in) = response.expires_in else {
        return Err(TokenError::MissingField("expires_in"));
    };
    let Some(scope) = response.scope else {
        return Err(TokenError::MissingField("scope"));
    };
    if !scope.split_ascii_whitespace().any(|s| s == SCOPE_ATPROTO) {
        return Err(TokenError::ScopeMissingAtproto);
    }
    match scope_rule {
        ScopeRule::WithinRequested(requested_scope) => {
            let requested: Vec<&str> = requested_scope.split_ascii_whitespace().collect();
            if !scope
                .split_ascii_whitespace()
                .all(|granted| requested.contains(&granted))
            {
                return Err(TokenError::ScopeNotSubset {
                    granted: scope.to_string(),
                    requested: requested_scope.to_owned(),
                });
            }
        }
        ScopeRule::CoversOriginal(original_scope) => {
            let granted: Vec<&str> = scope.split_ascii_whitespace().collect();
            if !original_scope
                .split_ascii_whitespace()
                .all(|had| granted.contains(&had))
            {
                return Err(TokenError::ScopeNotSubset {
                    granted: scope.to_string(),
                    requested: original_scope.to_owned(),
                });
            }
        }
    }
    let Some(sub) = response.sub else {
        return Err(TokenError::MissingField("sub"));
    };
    let sub_did = Did::new(sub.as_str()).map_err(TokenError::InvalidSubject)?;
    if let Some(expected) = expected_did {
        if *expected != sub_did {
            return Err(TokenError::SubjectMismatch {
                sub,
                expected: expected.clone(),
            });
        }
    }
    Ok(TokenSet {
        access_token: response.access_token.to_string(),
        refresh_token: response.refresh_token.map(|t| t.to_string()),
        token_type: response.token_type,
        scope: scope.to_string(),
        sub: sub_did,
        expires_at: Utc::now() + TimeDelta::seconds(expires_in),
    })
}

/// Exchange an authorization code for tokens (runs under the caller's
/// session lock).
#[tracing::instrument(level = "debug", skip_all, fields(issuer = %ctx.server.issuer))]
pub async fn exchange_code<H: HttpClient>(
    http: &H,
    dpop: &DpopClient,
    ctx: &RequestContext<'_>,
    code: &str,
    redirect_uri: &Url,
    code_verifier: &str,
    expected_did: Option<&Did>,
    requested_scope: &str,
) -> Result<TokenSet, TokenError> {
    let body = build_form(
        ctx,
        TokenRequestParameters {
            grant_type: GrantType::AuthorizationCode,
            code: code.to_owned(),
            redirect_uri: redirect_uri.clone(),
            code_verifier: code_verifier.to_owned(),
        },
    )?;
    let response = dpop
        .send(http, form_request(&ctx.server.token_endpoint, body), None)
        .await?;
    if response.status() != StatusCode::OK {
        let error = parse_error_body(response.body());
        return Err(TokenError::Rejected {
            status: response.status(),
            error: error.error,
            description: error.error_description,
        });
    }
    let parsed: TokenResponse =
        serde_json::from_slice(response.body()).map_err(TokenError::Malformed)?;
    validate_token_response(parsed, expected_did, ScopeRule::WithinRequested(requested_scope))
}

/// One refresh-grant POST, no retry policy; [`crate::refresh`] owns the
/// loop. Returns the raw response for classification.
pub async fn refresh_grant<H: HttpClient>(
    http: &H,
    dpop: &DpopClient,
    ctx: &RequestContext<'_>,
    refresh_token: &str,
    scope: &str,
) -> Result<http::Response<Vec<u8>>, TokenError> {
    let body = build_form(
        ctx,
        RefreshRequestParameters {
            grant_type: GrantType::RefreshToken,
            refresh_token: refresh_token.to_owned(),
            scope: Some(scope.to_owned()),
        },
    )?;
    Ok(dpop
        .send(http, form_request(&ctx.server.token_endpoint, body), None)
        .await?)
}

/// Best-effort token revocation (RFC 7009). Accepts 200 and 204.
#[tracing::instrument(level = "debug", skip_all, fields(issuer = %ctx.server.issuer))]
pub async fn revoke<H: HttpClient>(
    http: &H,
    dpop: &DpopClient,
    ctx: &RequestContext<'_>,
    token: &str,
) -> Result<(), TokenError> {
    let Some(endpoint) = ctx.server.revocation_endpoint.as_ref() else {
        return Ok(());
    };
    let body = build_form(
        ctx,
        RevocationRequestParameters {
            token: token.to_owned(),
        },
    )?;
    let response = dpop.send(http, form_request(endpoint, body), None).await?;
    match response.status() {
        StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
        status => {
            let error = parse_error_body(response.body());
            Err(TokenError::Rejected {
                status,
                error: error.error,
                description: error.error_description,
            })
        }
    }
}
