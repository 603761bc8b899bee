//! ES256 key management for DPoP.
//!
//! Only P-256 keys are accepted. Every key carries `use=sig` and a `kid`
//! derived from its public coordinates, and a freshly constructed manager
//! proves it can sign and verify before it is handed out.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jose_jwk::{Class, Jwk, Key, Parameters, crypto};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::ThreadRng;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum KeyError {
    #[error("only ES256 (P-256) keys are supported")]
    #[diagnostic(code(twill_oauth::dpop::unsupported_key))]
    UnsupportedAlgorithm,

    #[error("JWK is missing the private component")]
    #[diagnostic(code(twill_oauth::dpop::missing_private))]
    MissingPrivateKey,

    #[error("JWK `use` must be `sig`")]
    #[diagnostic(code(twill_oauth::dpop::wrong_use))]
    WrongUse,

    #[error("JWK kid {found} does not match derived kid {expected}")]
    #[diagnostic(code(twill_oauth::dpop::kid_mismatch))]
    KidMismatch { expected: SmolStr, found: SmolStr },

    #[error("key self-test failed")]
    #[diagnostic(code(twill_oauth::dpop::self_test))]
    SelfTest,

    #[error("JWK conversion failed: {0}")]
    #[diagnostic(code(twill_oauth::dpop::jwk))]
    JwkCrypto(String),
}

/// An ES256 keypair with its derived key id.
#[derive(Clone)]
pub struct DpopKey {
    secret: p256::SecretKey,
    kid: SmolStr,
}

impl std::fmt::Debug for DpopKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpopKey").field("kid", &self.kid).finish()
    }
}

impl DpopKey {
    /// Generate a fresh P-256 keypair.
    pub fn generate() -> Result<Self, KeyError> {
        Self::from_secret(p256::SecretKey::random(&mut ThreadRng::default()))
    }

    fn from_secret(secret: p256::SecretKey) -> Result<Self, KeyError> {
        let kid = derive_kid(&secret.public_key());
        let key = Self { secret, kid };
        key.self_test()?;
        Ok(key)
    }

    /// Import a private ES256 JWK, revalidating `use` and `kid`.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let secret = match crypto::Key::try_from(&jwk.key)
            .map_err(|e| KeyError::JwkCrypto(format!("{e:?}")))?
        {
            crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
            crypto::Key::P256(_) => return Err(KeyError::MissingPrivateKey),
            _ => return Err(KeyError::UnsupportedAlgorithm),
        };
        if let Some(cls) = &jwk.prm.cls {
            if !matches!(cls, Class::Signing) {
                return Err(KeyError::WrongUse);
            }
        }
        let derived = derive_kid(&secret.public_key());
        if let Some(kid) = &jwk.prm.kid {
            if *kid != derived.as_str() {
                return Err(KeyError::KidMismatch {
                    expected: derived,
                    found: kid.as_str().into(),
                });
            }
        }
        Self::from_secret(secret)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret)
    }

    /// Public JWK with `kid` and `use=sig`, as embedded in DPoP proofs.
    pub fn public_jwk(&self) -> Jwk {
        Jwk {
            key: Key::from(&crypto::Key::from(self.secret.public_key())),
            prm: self.parameters(),
        }
    }

    /// Private JWK (includes `d`) for encrypted persistence.
    pub fn to_private_jwk(&self) -> Jwk {
        Jwk {
            key: Key::from(&crypto::Key::from(self.secret.clone())),
            prm: self.parameters(),
        }
    }

    fn parameters(&self) -> Parameters {
        Parameters {
            kid: Some(self.kid.to_string()),
            cls: Some(Class::Signing),
            ..Default::default()
        }
    }

    fn self_test(&self) -> Result<(), KeyError> {
        let message = b"dpop key self-test";
        let signing = self.signing_key();
        let signature: Signature = signing.sign(message);
        VerifyingKey::from(&signing)
            .verify(message, &signature)
            .map_err(|_| KeyError::SelfTest)
    }
}

/// `kid` = first 8 chars of base64url(SHA-256(kty|crv|x|y)).
fn derive_kid(public: &p256::PublicKey) -> SmolStr {
    let point = public.to_encoded_point(false);
    let mut hasher = Sha256::new();
    hasher.update(b"EC|P-256|");
    hasher.update(point.x().expect("uncompressed point has x"));
    hasher.update(b"|");
    hasher.update(point.y().expect("uncompressed point has y"));
    let digest = URL_SAFE_NO_PAD.encode(hasher.finalize());
    SmolStr::new(&digest[..8])
}
