//! DPoP proof JWT construction (RFC 9449).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jose_jwa::{Algorithm, Signing};
use sha2::{Digest, Sha256};
use url::Url;

use crate::jose::{
    create_signed_jwt,
    jws::Header,
    jwt::{Claims, PublicClaims, RegisteredClaims},
};

use super::keys::DpopKey;

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

/// `htu` normalization: default port stripped, fragment dropped, path and
/// query kept verbatim.
pub fn normalize_htu(url: &Url) -> String {
    let mut htu = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().unwrap_or_default()
    );
    if let Some(port) = url.port() {
        // `Url` only reports non-default ports.
        htu.push_str(&format!(":{port}"));
    }
    htu.push_str(url.path());
    if let Some(query) = url.query() {
        htu.push('?');
        htu.push_str(query);
    }
    htu
}

/// Build a compact DPoP proof JWS with the embedded public JWK.
///
/// `ath` is included whenever an access token is supplied.
pub fn build_proof(
    key: &DpopKey,
    method: &str,
    url: &Url,
    nonce: Option<String>,
    access_token: Option<&str>,
) -> serde_json::Result<String> {
    let mut header = Header::from(Algorithm::Signing(Signing::Es256));
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(key.public_jwk());

    let ath = access_token.map(|token| URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes())));
    let claims = Claims {
        registered: RegisteredClaims {
            jti: Some(uuid::Uuid::new_v4().to_string().into()),
            iat: Some(Utc::now().timestamp()),
            ..Default::default()
        },
        public: PublicClaims {
            htm: Some(method.to_ascii_uppercase().into()),
            htu: Some(normalize_htu(url)),
            ath,
            nonce,
        },
    };
    create_signed_jwt(&key.signing_key(), &header, &claims)
}
