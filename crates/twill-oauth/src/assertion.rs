//! Client authentication: the confidential-client keyset and RFC 7523
//! `private_key_jwt` assertions.

use std::time::Duration;

use chrono::Utc;
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, JwkSet, Key, crypto};
use p256::ecdsa::SigningKey;
use smol_str::SmolStr;
use url::Url;
use uuid::Uuid;

use crate::jose::{
    create_signed_jwt,
    jws::Header,
    jwt::{Claims, RegisteredClaims},
};

// https://datatracker.ietf.org/doc/html/rfc7523#section-2.2
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Default assertion lifetime.
pub const DEFAULT_ASSERTION_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum KeysetError {
    #[error("keyset has no keys")]
    #[diagnostic(code(twill_oauth::keyset::empty))]
    Empty,

    #[error("server supports none of the keyset's signing algorithms")]
    #[diagnostic(code(twill_oauth::keyset::no_algorithm))]
    NoSupportedAlgorithm,

    #[error("keyset keys must be private ES256 (P-256) JWKs")]
    #[diagnostic(code(twill_oauth::keyset::unsupported))]
    UnsupportedKey,

    #[error("keyset JWK is missing a kid")]
    #[diagnostic(code(twill_oauth::keyset::missing_kid))]
    MissingKid,

    #[error("assertion signing failed")]
    #[diagnostic(code(twill_oauth::keyset::signing))]
    Signing(#[from] serde_json::Error),

    #[error("JWK conversion failed: {0}")]
    #[diagnostic(code(twill_oauth::keyset::jwk))]
    JwkCrypto(String),
}

/// Preference order for JWS algorithms:
/// ES256K, then ES/PS/RS families (smaller digests first), then
/// everything else in its original position.
pub fn compare_algos(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if a == "ES256K" {
        return Ordering::Less;
    }
    if b == "ES256K" {
        return Ordering::Greater;
    }
    for prefix in ["ES", "PS", "RS"] {
        match (a.strip_prefix(prefix), b.strip_prefix(prefix)) {
            (Some(sa), Some(sb)) => {
                if let (Ok(la), Ok(lb)) = (sa.parse::<u32>(), sb.parse::<u32>()) {
                    return la.cmp(&lb);
                }
            }
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }
    }
    std::cmp::Ordering::Equal
}

/// The algorithm this keyset would sign with, given what the server
/// advertises. Only ES256 keys are held, so the answer is ES256 when the
/// server accepts it.
pub fn negotiate_signing_alg(supported: &[String]) -> Option<&'static str> {
    let mut algs: Vec<&str> = supported.iter().map(String::as_str).collect();
    algs.sort_by(|a, b| compare_algos(a, b));
    algs.into_iter().find(|alg| *alg == "ES256").map(|_| "ES256")
}

struct KeysetKey {
    secret: p256::SecretKey,
    kid: SmolStr,
}

/// The client's signing keys, as published (publicly) in its metadata
/// `jwks` and used (privately) to mint client assertions. The first key
/// signs; the rest exist for rotation overlap.
pub struct Keyset {
    keys: Vec<KeysetKey>,
}

impl Keyset {
    /// Build from private JWKs. Every key needs a `kid` and P-256 secret
    /// material.
    pub fn try_from_jwks(jwks: Vec<Jwk>) -> Result<Self, KeysetError> {
        if jwks.is_empty() {
            return Err(KeysetError::Empty);
        }
        let mut keys = Vec::with_capacity(jwks.len());
        for jwk in &jwks {
            let kid = jwk
                .prm
                .kid
                .as_deref()
                .ok_or(KeysetError::MissingKid)?
                .into();
            let secret = match crypto::Key::try_from(&jwk.key)
                .map_err(|e| KeysetError::JwkCrypto(format!("{e:?}")))?
            {
                crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
                _ => return Err(KeysetError::UnsupportedKey),
            };
            keys.push(KeysetKey { secret, kid });
        }
        Ok(Self { keys })
    }

    /// Single-use keyset around a fresh ES256 key, for public clients
    /// that still need to sign a PAR request.
    pub fn ephemeral() -> Result<Self, KeysetError> {
        let key = crate::dpop::DpopKey::generate()
            .map_err(|e| KeysetError::JwkCrypto(e.to_string()))?;
        Self::try_from_jwks(vec![key.to_private_jwk()])
    }

    /// Public halves of every key, for serving as the metadata `jwks`.
    pub fn public_jwks(&self) -> JwkSet {
        JwkSet {
            keys: self
                .keys
                .iter()
                .map(|key| Jwk {
                    key: Key::from(&crypto::Key::from(key.secret.public_key())),
                    prm: jose_jwk::Parameters {
                        kid: Some(key.kid.to_string()),
                        cls: Some(jose_jwk::Class::Signing),
                        ..Default::default()
                    },
                })
                .collect(),
        }
    }

    /// RFC 7523 client assertion: `iss` = `sub` = client_id, `aud` =
    /// issuer, fresh `jti`, `iat` now, `exp` now + lifetime.
    pub fn create_assertion(
        &self,
        client_id: &Url,
        issuer: &Url,
        lifetime: Duration,
    ) -> Result<String, KeysetError> {
        let key = self.keys.first().ok_or(KeysetError::Empty)?;
        let mut header = Header::from(Algorithm::Signing(Signing::Es256));
        header.typ = Some("JWT".into());
        header.kid = Some(key.kid.clone());

        let iat = Utc::now().timestamp();
        let claims: Claims = RegisteredClaims {
            iss: Some(client_id.as_str().into()),
            sub: Some(client_id.as_str().into()),
            aud: Some(issuer.as_str().into()),
            jti: Some(Uuid::new_v4().to_string().into()),
            iat: Some(iat),
            exp: Some(iat + lifetime.as_secs() as i64),
            ..Default::default()
        }
        .into();
        Ok(create_signed_jwt(
            &SigningKey::from(&key.secret),
            &header,
            &claims,
        )?)
    }
}
