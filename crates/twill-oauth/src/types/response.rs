//! Wire responses from the PAR and token endpoints.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParResponse {
    pub request_uri: SmolStr,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    DPoP,
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::DPoP => "DPoP",
            TokenType::Bearer => "Bearer",
        }
    }
}

/// RFC 6749 §5.1 token payload. `sub` is the ATPROTO extension carrying
/// the account DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: SmolStr,
    pub token_type: TokenType,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<SmolStr>,
    pub scope: Option<SmolStr>,
    pub sub: Option<SmolStr>,
}

/// OAuth error body shape (RFC 6749 §5.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    #[serde(default)]
    pub error: Option<SmolStr>,
    #[serde(default)]
    pub error_description: Option<String>,
}
