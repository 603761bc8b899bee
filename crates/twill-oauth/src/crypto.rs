//! AES-256-GCM encryption with HKDF-derived per-context keys.
//!
//! Every ciphertext is carried in a versioned envelope
//! `{version, iv, data, tag}` (all byte fields base64). The additional
//! authenticated data is the dotted JSON path of the protected field, so
//! a ciphertext cannot be replayed into a different slot, and the
//! per-context HKDF derivation keeps key material for unrelated record
//! types independent.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

pub const MASTER_KEY_ENV: &str = "ATPROTO_MASTER_KEY";
pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;
pub const ENVELOPE_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CryptoError {
    #[error("master key must be {KEY_LENGTH} bytes, got {0}")]
    #[diagnostic(
        code(twill_oauth::crypto::key_length),
        help("set ATPROTO_MASTER_KEY to base64 of 32 random bytes")
    )]
    InvalidKeyLength(usize),

    #[error("master key is not valid base64")]
    #[diagnostic(code(twill_oauth::crypto::key_encoding))]
    InvalidKeyEncoding(#[source] base64::DecodeError),

    #[error("unsupported envelope version {0}")]
    #[diagnostic(code(twill_oauth::crypto::version))]
    UnsupportedVersion(u8),

    #[error("malformed encryption envelope")]
    #[diagnostic(code(twill_oauth::crypto::envelope))]
    MalformedEnvelope,

    #[error("encryption failed")]
    #[diagnostic(code(twill_oauth::crypto::encrypt))]
    EncryptionFailed,

    #[error("decryption failed")]
    #[diagnostic(
        code(twill_oauth::crypto::decrypt),
        help("wrong key, wrong context, or tampered ciphertext")
    )]
    DecryptionFailed,
}

/// Wire envelope for a single encrypted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub version: u8,
    /// 12 random bytes, base64.
    pub iv: String,
    /// Ciphertext without the tag, base64.
    pub data: String,
    /// GCM authentication tag, base64.
    pub tag: String,
}

impl EncryptedValue {
    /// Cheap structural check used by the serializer to recognize
    /// encrypted slots inside a JSON tree.
    pub fn looks_like(value: &serde_json::Value) -> bool {
        value.as_object().is_some_and(|obj| {
            obj.len() == 4
                && obj.get("version").is_some_and(serde_json::Value::is_u64)
                && obj.get("iv").is_some_and(serde_json::Value::is_string)
                && obj.get("data").is_some_and(serde_json::Value::is_string)
                && obj.get("tag").is_some_and(serde_json::Value::is_string)
        })
    }
}

/// Process-wide encryption service over a 32-byte master key.
pub struct CryptoService {
    master_key: Zeroizing<[u8; KEY_LENGTH]>,
}

impl CryptoService {
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self {
            master_key: Zeroizing::new(master_key),
        }
    }

    /// Load the master key from `ATPROTO_MASTER_KEY` (base64, 32 bytes).
    /// Without it a random per-process key is generated, which makes
    /// previously stored state unreadable after restart.
    pub fn from_env() -> Result<Self, CryptoError> {
        match std::env::var(MASTER_KEY_ENV) {
            Ok(encoded) => {
                let mut decoded = BASE64
                    .decode(encoded.trim())
                    .map_err(CryptoError::InvalidKeyEncoding)?;
                if decoded.len() != KEY_LENGTH {
                    let len = decoded.len();
                    decoded.zeroize();
                    return Err(CryptoError::InvalidKeyLength(len));
                }
                let mut key = [0u8; KEY_LENGTH];
                key.copy_from_slice(&decoded);
                decoded.zeroize();
                Ok(Self::new(key))
            }
            Err(_) => {
                tracing::warn!(
                    "{MASTER_KEY_ENV} not set; using a random per-process key, \
                     encrypted state will not survive a restart"
                );
                let mut key = [0u8; KEY_LENGTH];
                getrandom::getrandom(&mut key).expect("OS randomness unavailable");
                Ok(Self::new(key))
            }
        }
    }

    /// HKDF-SHA256 derivation:
    /// `salt = SHA256("atproto-salt-" + context)`, `info = "atproto-" + context`.
    fn derive_key(&self, context: &str) -> Zeroizing<[u8; KEY_LENGTH]> {
        let salt = Sha256::digest(format!("atproto-salt-{context}"));
        let info = format!("atproto-{context}");
        let hk = Hkdf::<Sha256>::new(Some(&salt), self.master_key.as_ref());
        let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
        hk.expand(info.as_bytes(), okm.as_mut())
            .expect("32 bytes is a valid HKDF output length");
        okm
    }

    pub fn encrypt(
        &self,
        plaintext: &[u8],
        context: &str,
        aad: &str,
    ) -> Result<EncryptedValue, CryptoError> {
        let key = self.derive_key(context);
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| CryptoError::EncryptionFailed)?;
        let mut iv = [0u8; IV_LENGTH];
        getrandom::getrandom(&mut iv).expect("OS randomness unavailable");
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);
        Ok(EncryptedValue {
            version: ENVELOPE_VERSION,
            iv: BASE64.encode(iv),
            data: BASE64.encode(&sealed),
            tag: BASE64.encode(&tag),
        })
    }

    pub fn decrypt(
        &self,
        value: &EncryptedValue,
        context: &str,
        aad: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        if value.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(value.version));
        }
        let iv = BASE64
            .decode(&value.iv)
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        if iv.len() != IV_LENGTH {
            return Err(CryptoError::MalformedEnvelope);
        }
        let mut sealed = BASE64
            .decode(&value.data)
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        let tag = BASE64
            .decode(&value.tag)
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        if tag.len() != TAG_LENGTH {
            return Err(CryptoError::MalformedEnvelope);
        }
        sealed.extend_from_slice(&tag);

        let key = self.derive_key(context);
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|_| CryptoError::DecryptionFailed)?;
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Convenience for string payloads.
    pub fn encrypt_str(
        &self,
        plaintext: &str,
        context: &str,
        aad: &str,
    ) -> Result<EncryptedValue, CryptoError> {
        self.encrypt(plaintext.as_bytes(), context, aad)
    }

    pub fn decrypt_str(
        &self,
        value: &EncryptedValue,
        context: &str,
        aad: &str,
    ) -> Result<String, CryptoError> {
        String::from_utf8(self.decrypt(value, context, aad)?)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
