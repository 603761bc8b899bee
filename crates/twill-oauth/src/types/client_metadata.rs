//! The client's self-describing metadata document.

use jose_jwk::JwkSet;
use serde::{Deserialize, Serialize};
use url::Url;

/// `application_type` member; defaults to `web`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationType {
    #[default]
    Web,
    Native,
}

/// `token_endpoint_auth_method` values this profile accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    PrivateKeyJwt,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::PrivateKeyJwt => "private_key_jwt",
        }
    }
}

/// Client metadata document (draft-ietf-oauth-client-id-metadata-document,
/// AT Protocol profile). Validation lives in [`crate::metadata`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_id: Url,
    #[serde(default)]
    pub application_type: ApplicationType,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub redirect_uris: Vec<Url>,
    pub scope: String,
    pub dpop_bound_access_tokens: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<AuthMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_signing_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwkSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,
}

impl ClientMetadata {
    /// Confidential ⟺ the auth method is `private_key_jwt`.
    pub fn is_confidential(&self) -> bool {
        matches!(
            self.token_endpoint_auth_method,
            Some(AuthMethod::PrivateKeyJwt)
        )
    }

    /// Space-separated scope values.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_ascii_whitespace()
    }
}
