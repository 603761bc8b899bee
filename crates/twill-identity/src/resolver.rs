//! Resolver options, the [`IdentityResolver`] trait, and identity errors.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use smol_str::SmolStr;
use url::Url;

use crate::types::{Did, DidDocument, Handle, IdentifierError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for identity resolution operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("{kind}")]
pub struct IdentityError {
    #[diagnostic_source]
    kind: IdentityErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<SmolStr>,
    context: Option<SmolStr>,
}

/// Error categories for identity resolution.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum IdentityErrorKind {
    /// Handle could not be resolved to a DID
    #[error("handle resolution failed: {0}")]
    #[diagnostic(
        code(twill_identity::resolution),
        help("check the handle's DNS TXT record or well-known endpoint")
    )]
    Resolution(SmolStr),

    /// A claimed binding between identifiers did not verify
    #[error("{binding} binding mismatch: expected {expected}, found {actual}")]
    #[diagnostic(
        code(twill_identity::validation),
        help("the identity's documents disagree with the claimed binding; do not proceed")
    )]
    Validation {
        binding: &'static str,
        expected: SmolStr,
        actual: SmolStr,
    },

    /// DID document is malformed or unusable
    #[error("invalid DID document: {0}")]
    #[diagnostic(code(twill_identity::document))]
    Document(SmolStr),

    /// DID method other than plc/web
    #[error("unsupported DID method: {0}")]
    #[diagnostic(
        code(twill_identity::unsupported_method),
        help("supported DID methods: did:plc, did:web")
    )]
    UnsupportedDidMethod(SmolStr),

    /// Malformed handle or DID string
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identifier(#[from] IdentifierError),

    /// Well-known atproto-did body was not a DID
    #[error("invalid well-known atproto-did content")]
    #[diagnostic(
        code(twill_identity::invalid_well_known),
        help("expected the response body to be a bare DID")
    )]
    InvalidWellKnown,

    /// DNS lookup failed
    #[error("DNS resolution error")]
    #[diagnostic(code(twill_identity::dns))]
    Dns,

    /// Transport-level error
    #[error("transport error")]
    #[diagnostic(code(twill_identity::transport))]
    Transport,

    /// Unexpected HTTP status
    #[error("HTTP {0}")]
    #[diagnostic(code(twill_identity::http_status))]
    HttpStatus(StatusCode),

    /// Response body could not be parsed
    #[error("serialization error")]
    #[diagnostic(code(twill_identity::serialization))]
    Serialization,

    /// URL construction failed
    #[error("URL error")]
    #[diagnostic(code(twill_identity::url))]
    Url,
}

impl IdentityError {
    pub fn new(kind: IdentityErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    pub fn kind(&self) -> &IdentityErrorKind {
        &self.kind
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn with_help(mut self, help: impl Into<SmolStr>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<SmolStr>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn resolution(msg: impl Into<SmolStr>) -> Self {
        Self::new(IdentityErrorKind::Resolution(msg.into()), None)
    }

    pub fn validation(
        binding: &'static str,
        expected: impl Into<SmolStr>,
        actual: impl Into<SmolStr>,
    ) -> Self {
        Self::new(
            IdentityErrorKind::Validation {
                binding,
                expected: expected.into(),
                actual: actual.into(),
            },
            None,
        )
    }

    pub fn document(msg: impl Into<SmolStr>) -> Self {
        Self::new(IdentityErrorKind::Document(msg.into()), None)
    }

    pub fn unsupported_did_method(did: impl Into<SmolStr>) -> Self {
        Self::new(IdentityErrorKind::UnsupportedDidMethod(did.into()), None)
    }

    pub fn invalid_well_known() -> Self {
        Self::new(IdentityErrorKind::InvalidWellKnown, None)
    }

    pub fn dns(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(IdentityErrorKind::Dns, Some(Box::new(source)))
    }

    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(IdentityErrorKind::Transport, Some(Box::new(source)))
    }

    pub fn http_status(status: StatusCode) -> Self {
        Self::new(IdentityErrorKind::HttpStatus(status), None)
    }

    pub fn serialization(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(IdentityErrorKind::Serialization, Some(Box::new(source)))
    }
}

impl From<IdentifierError> for IdentityError {
    fn from(e: IdentifierError) -> Self {
        Self::new(IdentityErrorKind::Identifier(e), None)
    }
}

impl From<url::ParseError> for IdentityError {
    fn from(e: url::ParseError) -> Self {
        Self::new(IdentityErrorKind::Url, Some(Box::new(e)))
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e).with_help("ensure the response is valid JSON")
    }
}

impl From<twill_common::HttpError> for IdentityError {
    fn from(e: twill_common::HttpError) -> Self {
        Self::transport(e)
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Configurable resolver options.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Base URL for `did:plc` document lookups.
    pub plc_directory: Url,
    /// Timeout for the `_atproto.<handle>` TXT lookup.
    pub dns_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            plc_directory: Url::parse("https://plc.directory").expect("valid url"),
            dns_timeout: Duration::from_secs(3),
        }
    }
}

/// Trait for identity resolution, for pluggable implementations.
///
/// [`crate::TwillResolver`] is the shipped implementation; tests and hosts
/// with their own directory infrastructure can substitute one.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a handle to its DID.
    async fn resolve_handle(&self, handle: &Handle) -> Result<Did>;

    /// Fetch and validate the DID document for a DID.
    async fn get_did_info(&self, did: &Did) -> Result<DidDocument>;

    /// The PDS base URL for a DID. Requires an HTTPS endpoint.
    async fn pds_for_did(&self, did: &Did) -> Result<Url> {
        let doc = self.get_did_info(did).await?;
        pds_url_from_doc(&doc)
    }

    /// Resolve a handle all the way to its DID document, enforcing the
    /// handle↔DID alias binding.
    async fn resolve_identity(&self, handle: &Handle) -> Result<(Did, DidDocument)> {
        let did = self.resolve_handle(handle).await?;
        let doc = self.get_did_info(&did).await?;
        if !doc.has_handle_alias(handle) {
            return Err(IdentityError::validation(
                "handle",
                handle.as_aka_uri(),
                doc.also_known_as.join(", "),
            ));
        }
        Ok((did, doc))
    }
}

/// Extract the PDS URL from a document, requiring HTTPS.
pub fn pds_url_from_doc(doc: &DidDocument) -> Result<Url> {
    let raw = doc
        .pds_endpoint()
        .ok_or_else(|| IdentityError::document("document has no PDS service entry"))?;
    let url = Url::parse(raw)?;
    if url.scheme() != "https" {
        return Err(
            IdentityError::document("PDS endpoint must be https").with_context(raw.to_string())
        );
    }
    Ok(url)
}
