//! Wire parameters for PAR, token, refresh, and revocation requests.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

/// PAR form body (RFC 9126 §2.1), minus the client authentication members
/// which the request layer wraps around every body.
#[derive(Debug, Clone, Serialize)]
pub struct ParParameters {
    pub response_type: ResponseType,
    pub redirect_uri: Url,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
    pub state: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// `authorization_code` grant body (RFC 6749 §4.1.3 + PKCE §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequestParameters {
    pub grant_type: GrantType,
    pub code: String,
    pub redirect_uri: Url,
    pub code_verifier: String,
}

/// `refresh_token` grant body (RFC 6749 §6).
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequestParameters {
    pub grant_type: GrantType,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Revocation body (RFC 7009 §2.1).
#[derive(Debug, Clone, Serialize)]
pub struct RevocationRequestParameters {
    pub token: String,
}

/// Caller-facing knobs for `authorize`.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// User handle to start from. Exactly one of `handle`/`pds_url`.
    pub handle: Option<String>,
    /// PDS base URL to start from when the handle is unknown.
    pub pds_url: Option<Url>,
    /// Requested scope; must include `atproto`.
    pub scope: Option<String>,
    /// Forwarded to the authorization request as `login_hint`.
    pub login_hint: Option<String>,
    /// OIDC-style `nonce` forwarded to the authorization request.
    pub nonce: Option<String>,
    /// Forwarded as the OIDC-style `prompt` parameter.
    pub prompt: Option<String>,
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
    pub iss: String,
}
