//! PKCE (RFC 7636), S256 method only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use rand::rngs::ThreadRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Unreserved characters allowed in a code verifier (RFC 7636 §4.1).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;
pub const DEFAULT_VERIFIER_LEN: usize = 128;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PkceError {
    #[error("verifier length {0} outside [{MIN_VERIFIER_LEN}, {MAX_VERIFIER_LEN}]")]
    #[diagnostic(code(twill_oauth::pkce::length))]
    InvalidLength(usize),

    #[error("verifier contains character outside the unreserved set")]
    #[diagnostic(
        code(twill_oauth::pkce::charset),
        help("verifiers may only contain [A-Za-z0-9-._~]")
    )]
    InvalidCharset,
}

fn validate_verifier(verifier: &str) -> Result<(), PkceError> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
        return Err(PkceError::InvalidLength(verifier.len()));
    }
    if !verifier.bytes().all(|b| VERIFIER_CHARSET.contains(&b)) {
        return Err(PkceError::InvalidCharset);
    }
    Ok(())
}

/// Generate a random code verifier of `len` characters.
pub fn generate_verifier(len: usize) -> Result<String, PkceError> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(PkceError::InvalidLength(len));
    }
    let mut rng = ThreadRng::default();
    Ok((0..len)
        .map(|_| VERIFIER_CHARSET[rng.gen_range(0..VERIFIER_CHARSET.len())] as char)
        .collect())
}

/// S256 challenge: unpadded base64url of the verifier's SHA-256 digest.
pub fn generate_challenge(verifier: &str) -> Result<String, PkceError> {
    validate_verifier(verifier)?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())))
}

/// Generate a fresh (verifier, challenge) pair at the default length.
pub fn generate_pair() -> Result<(String, String), PkceError> {
    let verifier = generate_verifier(DEFAULT_VERIFIER_LEN)?;
    let challenge = generate_challenge(&verifier)?;
    Ok((verifier, challenge))
}

/// Constant-time check that `challenge` matches `verifier`.
pub fn verify(challenge: &str, verifier: &str) -> bool {
    let Ok(computed) = generate_challenge(verifier) else {
        return false;
    };
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}
