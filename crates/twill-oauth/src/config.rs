//! Process-wide client configuration.

use std::time::Duration;

use url::Url;

use crate::assertion::Keyset;
use crate::metadata::{ClientMetadataError, validate_client_metadata};
use crate::types::ClientMetadata;

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);
pub const DEFAULT_DPOP_NONCE_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ConfigError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    ClientMetadata(#[from] ClientMetadataError),

    #[error("confidential client configuration requires a keyset")]
    #[diagnostic(
        code(twill_oauth::config::missing_keyset),
        help("provide the private JWKs matching the metadata `jwks`")
    )]
    MissingKeyset,
}

/// Everything the client needs to run flows, validated on construction
/// and on every mutation.
pub struct OAuthConfig {
    pub client_metadata: ClientMetadata,
    pub keyset: Option<Keyset>,
    /// Lifetime of minted client assertions.
    pub default_token_lifetime: Duration,
    /// TTL for stored DPoP nonces.
    pub dpop_nonce_lifetime: Duration,
    /// PLC directory used for `did:plc` resolution.
    pub plc_directory: Url,
}

impl OAuthConfig {
    pub fn new(client_metadata: ClientMetadata) -> Result<Self, ConfigError> {
        validate_client_metadata(&client_metadata)?;
        Ok(Self {
            client_metadata,
            keyset: None,
            default_token_lifetime: DEFAULT_TOKEN_LIFETIME,
            dpop_nonce_lifetime: DEFAULT_DPOP_NONCE_LIFETIME,
            plc_directory: Url::parse("https://plc.directory").expect("valid url"),
        })
    }

    pub fn with_keyset(mut self, keyset: Keyset) -> Self {
        self.keyset = Some(keyset);
        self
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_token_lifetime = lifetime;
        self
    }

    pub fn with_dpop_nonce_lifetime(mut self, lifetime: Duration) -> Self {
        self.dpop_nonce_lifetime = lifetime;
        self
    }

    pub fn with_plc_directory(mut self, plc_directory: Url) -> Self {
        self.plc_directory = plc_directory;
        self
    }

    /// Cross-field checks, run again at client assembly time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_metadata(&self.client_metadata)?;
        if self.client_metadata.is_confidential() && self.keyset.is_none() {
            return Err(ConfigError::MissingKeyset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::valid_client_metadata;
    use crate::types::AuthMethod;

    #[test]
    fn defaults_and_validation() {
        let config = OAuthConfig::new(valid_client_metadata()).unwrap();
        assert_eq!(config.default_token_lifetime, Duration::from_secs(300));
        assert_eq!(config.dpop_nonce_lifetime, Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn invalid_metadata_rejected_at_construction() {
        let mut metadata = valid_client_metadata();
        metadata.scope = "openid".into();
        assert!(OAuthConfig::new(metadata).is_err());
    }

    #[test]
    fn confidential_client_needs_keys() {
        let mut metadata = valid_client_metadata();
        metadata.token_endpoint_auth_method = Some(AuthMethod::PrivateKeyJwt);
        metadata.token_endpoint_auth_signing_alg = Some("ES256".into());
        metadata.jwks_uri = Some(Url::parse("https://app.test/jwks.json").unwrap());
        let config = OAuthConfig::new(metadata).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKeyset)
        ));

        let config = config.with_keyset(Keyset::ephemeral().unwrap());
        config.validate().unwrap();
    }
}
