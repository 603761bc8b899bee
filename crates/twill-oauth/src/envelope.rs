//! Versioned, typed storage records with encrypted sensitive fields.
//!
//! Values persisted through [`crate::storage::Storage`] are JSON
//! envelopes `{version, type, created_at, updated_at, data}`. Before a
//! record is written, its `data` tree is walked with a path stack and
//! the sensitive leaves (`access_token`, `refresh_token`,
//! `pkce_verifier`, and the EC private component `d`) are replaced by
//! [`EncryptedValue`] objects; the dotted path (`data.tokens.access_token`)
//! is the AAD, the record type the key-derivation context. Reading
//! reverses the walk.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::crypto::{CryptoError, CryptoService, EncryptedValue};

pub const RECORD_VERSION: u32 = 1;

/// Field names whose string values are encrypted at rest.
const SENSITIVE_FIELDS: &[&str] = &["access_token", "refresh_token", "pkce_verifier", "d"];

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EnvelopeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Crypto(#[from] CryptoError),

    #[error("record serialization failed")]
    #[diagnostic(code(twill_oauth::envelope::serde))]
    Serde(#[from] serde_json::Error),

    #[error("record type mismatch: expected {expected}, found {actual}")]
    #[diagnostic(code(twill_oauth::envelope::record_type))]
    WrongType { expected: String, actual: String },

    #[error("unsupported record version {0}")]
    #[diagnostic(code(twill_oauth::envelope::version))]
    UnsupportedVersion(u32),
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Record {
    version: u32,
    #[serde(rename = "type")]
    record_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data: Value,
}

/// Serializes values into sealed storage records and back.
#[derive(Clone)]
pub struct RecordCodec {
    crypto: Arc<CryptoService>,
}

impl RecordCodec {
    pub fn new(crypto: Arc<CryptoService>) -> Self {
        Self { crypto }
    }

    /// Serialize `value` into an envelope string with sensitive fields
    /// encrypted under the `record_type` context.
    pub fn seal<T: Serialize>(&self, record_type: &str, value: &T) -> Result<String, EnvelopeError> {
        let mut data = serde_json::to_value(value)?;
        let mut path = vec!["data".to_owned()];
        self.seal_tree(&mut data, &mut path, record_type)?;
        let now = Utc::now();
        let record = Record {
            version: RECORD_VERSION,
            record_type: record_type.to_owned(),
            created_at: now,
            updated_at: now,
            data,
        };
        Ok(serde_json::to_string(&record)?)
    }

    /// Parse an envelope string, decrypt sensitive fields, and
    /// deserialize into `T`. The stored type tag must match.
    pub fn open<T: DeserializeOwned>(
        &self,
        record_type: &str,
        raw: &str,
    ) -> Result<T, EnvelopeError> {
        let mut record: Record = serde_json::from_str(raw)?;
        if record.version != RECORD_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(record.version));
        }
        if record.record_type != record_type {
            return Err(EnvelopeError::WrongType {
                expected: record_type.to_owned(),
                actual: record.record_type,
            });
        }
        let mut path = vec!["data".to_owned()];
        self.open_tree(&mut record.data, &mut path, record_type)?;
        Ok(serde_json::from_value(record.data)?)
    }

    fn seal_tree(
        &self,
        node: &mut Value,
        path: &mut Vec<String>,
        context: &str,
    ) -> Result<(), EnvelopeError> {
        match node {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    path.push(key.clone());
                    if SENSITIVE_FIELDS.contains(&key.as_str()) {
                        if let Value::String(plaintext) = child {
                            let sealed = self.crypto.encrypt_str(
                                plaintext,
                                context,
                                &path.join("."),
                            )?;
                            *child = serde_json::to_value(sealed)?;
                        }
                    } else {
                        self.seal_tree(child, path, context)?;
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter_mut().enumerate() {
                    path.push(index.to_string());
                    self.seal_tree(child, path, context)?;
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn open_tree(
        &self,
        node: &mut Value,
        path: &mut Vec<String>,
        context: &str,
    ) -> Result<(), EnvelopeError> {
        match node {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    path.push(key.clone());
                    if SENSITIVE_FIELDS.contains(&key.as_str())
                        && EncryptedValue::looks_like(child)
                    {
                        let sealed: EncryptedValue = serde_json::from_value(child.clone())?;
                        let plaintext =
                            self.crypto.decrypt_str(&sealed, context, &path.join("."))?;
                        *child = Value::String(plaintext);
                    } else {
                        self.open_tree(child, path, context)?;
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter_mut().enumerate() {
                    path.push(index.to_string());
                    self.open_tree(child, path, context)?;
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }
}
