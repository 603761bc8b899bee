//! Validated identifier newtypes and DID document model.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use smol_str::{SmolStr, ToSmolStr};
use thiserror::Error;
use url::Url;

/// Validation failure for a handle or DID string.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum IdentifierError {
    #[error("{kind} too long: {len} > {max}")]
    #[diagnostic(code(twill_identity::identifier_too_long))]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("invalid {kind}: {value:?}")]
    #[diagnostic(code(twill_identity::identifier_invalid))]
    Invalid { kind: &'static str, value: SmolStr },
}

static HANDLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]([a-z0-9-]{0,61}[a-z0-9])?$")
        .unwrap()
});

static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

/// A normalized AT Protocol handle (`alice.example.com`).
///
/// Construction strips a leading `@`, lowercases, and validates against the
/// handle grammar, so every `Handle` in the system is already canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    pub fn new(handle: &str) -> Result<Self, IdentifierError> {
        let handle = handle.strip_prefix('@').unwrap_or(handle);
        let handle = handle.to_ascii_lowercase();
        if handle.len() > 253 {
            return Err(IdentifierError::TooLong {
                kind: "handle",
                len: handle.len(),
                max: 253,
            });
        }
        if !HANDLE_REGEX.is_match(&handle) {
            return Err(IdentifierError::Invalid {
                kind: "handle",
                value: handle.to_smolstr(),
            });
        }
        Ok(Self(SmolStr::new(handle)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `at://` alias form used in DID document `alsoKnownAs` entries.
    pub fn as_aka_uri(&self) -> String {
        format!("at://{}", self.0)
    }
}

impl FromStr for Handle {
    type Err = IdentifierError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(D::Error::custom)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decentralized identifier (`did:plc:…` or `did:web:…`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Did(SmolStr);

impl Did {
    pub fn new(did: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let did = did.as_ref();
        if did.len() > 2048 {
            return Err(IdentifierError::TooLong {
                kind: "did",
                len: did.len(),
                max: 2048,
            });
        }
        if !DID_REGEX.is_match(did) {
            return Err(IdentifierError::Invalid {
                kind: "did",
                value: did.to_smolstr(),
            });
        }
        Ok(Self(SmolStr::new(did)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method segment (`plc`, `web`, …).
    pub fn method(&self) -> &str {
        self.0
            .strip_prefix("did:")
            .and_then(|rest| rest.split(':').next())
            .unwrap_or_default()
    }

    /// The method-specific identifier after `did:<method>:`.
    pub fn identifier(&self) -> &str {
        let rest = self.0.strip_prefix("did:").unwrap_or_default();
        rest.split_once(':').map(|(_, id)| id).unwrap_or_default()
    }
}

impl FromStr for Did {
    type Err = IdentifierError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Service entry in a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// Service type advertised by a user's home server.
pub const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// A DID document as served by the PLC directory or a `did:web` host.
///
/// Only the fields the OAuth flow consumes are modeled; unknown members
/// are ignored on parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: Did,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub service: Vec<Service>,
    /// Convenience field some directories emit alongside `service`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pds: Option<String>,
}

impl DidDocument {
    /// The PDS endpoint: the `pds` field when present, otherwise the first
    /// service entry of type [`PDS_SERVICE_TYPE`].
    pub fn pds_endpoint(&self) -> Option<&str> {
        if let Some(pds) = &self.pds {
            return Some(pds);
        }
        self.service
            .iter()
            .find(|s| s.service_type == PDS_SERVICE_TYPE)
            .map(|s| s.service_endpoint.as_str())
    }

    /// Whether `alsoKnownAs` carries the `at://<handle>` alias.
    pub fn has_handle_alias(&self, handle: &Handle) -> bool {
        let expected = handle.as_aka_uri();
        self.also_known_as.iter().any(|aka| *aka == expected)
    }
}

/// Strip default ports, trailing slashes, query, and fragment so two
/// spellings of the same service URL compare equal.
pub fn normalize_service_url(url: &Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or_default();
    let port = match (url.port(), scheme) {
        (Some(443), "https") | (Some(80), "http") | (None, _) => String::new(),
        (Some(p), _) => format!(":{p}"),
    };
    let path = url.path().trim_end_matches('/');
    format!("{scheme}://{host}{port}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_normalizes_and_validates() {
        let h = Handle::new("@Alice.Example.COM").unwrap();
        assert_eq!(h.as_str(), "alice.example.com");
        assert_eq!(h.as_aka_uri(), "at://alice.example.com");

        assert!(Handle::new("alice").is_err());
        assert!(Handle::new("alice..example.com").is_err());
        assert!(Handle::new("-alice.example.com").is_err());
        assert!(Handle::new("alice.example.123").is_err());
        assert!(Handle::new("alice.test").is_ok());
    }

    #[test]
    fn did_validates() {
        let did = Did::new("did:plc:abc123").unwrap();
        assert_eq!(did.method(), "plc");
        assert_eq!(did.identifier(), "abc123");

        let web = Did::new("did:web:example.com:user:alice").unwrap();
        assert_eq!(web.method(), "web");
        assert_eq!(web.identifier(), "example.com:user:alice");

        assert!(Did::new("did:plc:").is_err());
        assert!(Did::new("plc:abc").is_err());
        assert!(Did::new("did:PLC:abc").is_err());
    }

    #[test]
    fn pds_endpoint_prefers_pds_field() {
        let doc: DidDocument = serde_json::from_str(
            r##"{
                "id": "did:plc:abc",
                "alsoKnownAs": ["at://alice.test"],
                "pds": "https://pds.test",
                "service": [{
                    "id": "#atproto_pds",
                    "type": "AtprotoPersonalDataServer",
                    "serviceEndpoint": "https://other.test"
                }]
            }"##,
        )
        .unwrap();
        assert_eq!(doc.pds_endpoint(), Some("https://pds.test"));
        assert!(doc.has_handle_alias(&Handle::new("alice.test").unwrap()));
        assert!(!doc.has_handle_alias(&Handle::new("bob.test").unwrap()));
    }

    #[test]
    fn pds_endpoint_from_service() {
        let doc: DidDocument = serde_json::from_str(
            r##"{
                "id": "did:plc:abc",
                "service": [{
                    "id": "#atproto_pds",
                    "type": "AtprotoPersonalDataServer",
                    "serviceEndpoint": "https://pds.test"
                }]
            }"##,
        )
        .unwrap();
        assert_eq!(doc.pds_endpoint(), Some("https://pds.test"));
    }

    #[test]
    fn normalize_strips_default_port_and_slash() {
        let cases = [
            ("https://pds.test:443/", "https://pds.test"),
            ("https://pds.test/", "https://pds.test"),
            ("https://pds.test:8443/", "https://pds.test:8443"),
            ("https://pds.test/base/", "https://pds.test/base"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_service_url(&Url::parse(input).unwrap()), expected);
        }
    }
}
