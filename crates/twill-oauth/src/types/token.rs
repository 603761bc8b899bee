use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use twill_identity::Did;

use super::response::TokenType;

/// Expiry slack in seconds: a token within this window of `expires_at`
/// is already treated as expired so in-flight requests don't race the
/// deadline.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// The tokens a session holds after a successful exchange.
///
/// `token_type` is always `DPoP` in this profile; the parser enforces it
/// before a `TokenSet` is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: TokenType,
    pub scope: String,
    pub sub: Did,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    pub fn expired(&self) -> bool {
        self.expired_within(Duration::seconds(EXPIRY_BUFFER_SECS))
    }

    pub fn expired_within(&self, buffer: Duration) -> bool {
        Utc::now() >= self.expires_at - buffer
    }

    pub fn renewable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_ascii_whitespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_set(expires_in: Duration, refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: "at".into(),
            refresh_token: refresh.map(Into::into),
            token_type: TokenType::DPoP,
            scope: "atproto".into(),
            sub: Did::new("did:plc:abc").unwrap(),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn expiry_respects_buffer() {
        assert!(!token_set(Duration::hours(1), None).expired());
        // Inside the 30 s buffer counts as expired.
        assert!(token_set(Duration::seconds(10), None).expired());
        assert!(token_set(Duration::seconds(-10), None).expired());
    }

    #[test]
    fn renewable_requires_nonempty_refresh_token() {
        assert!(token_set(Duration::hours(1), Some("rt")).renewable());
        assert!(!token_set(Duration::hours(1), Some("")).renewable());
        assert!(!token_set(Duration::hours(1), None).renewable());
    }
}
