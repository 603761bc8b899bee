//! Identity resolution for the AT Protocol.
//!
//! Drives the handle → DID → DID document → PDS chain the OAuth flow
//! starts from, with bidirectional verification:
//!
//! - **Handle → DID**: DNS TXT record at `_atproto.<handle>` first (3 s
//!   timeout), then HTTPS `https://<handle>/.well-known/atproto-did`. A
//!   DNS `did=` record that fails DID validation fails resolution outright
//!   rather than falling back.
//! - **DID → document**: PLC directory lookup for `did:plc`, well-known
//!   `did.json` for `did:web`.
//! - **Bindings**: handle↔DID via `alsoKnownAs`, DID↔PDS and DID↔issuer
//!   via URL-normalized comparison.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use twill_identity::{TwillResolver, resolver::IdentityResolver, types::Handle};
//!
//! let resolver = TwillResolver::new(twill_common::GuardedClient::new()?).with_system_dns();
//! let did = resolver.resolve_handle(&Handle::new("alice.bsky.social")?).await?;
//! let doc = resolver.get_did_info(&did).await?;
//! # Ok(())
//! # }
//! ```

pub mod resolver;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use http::StatusCode;
use url::Url;

use twill_common::HttpClient;

use crate::resolver::{Result, pds_url_from_doc};
use crate::types::normalize_service_url;

pub use crate::resolver::{IdentityError, IdentityResolver, ResolverOptions};
pub use crate::types::{Did, DidDocument, Handle};

/// Default resolver: DNS TXT plus HTTPS well-known over an injected
/// [`HttpClient`].
#[derive(Clone)]
pub struct TwillResolver<H> {
    http: H,
    opts: ResolverOptions,
    dns: Option<Arc<TokioAsyncResolver>>,
}

impl<H: HttpClient> TwillResolver<H> {
    pub fn new(http: H) -> Self {
        Self::with_options(http, ResolverOptions::default())
    }

    pub fn with_options(http: H, opts: ResolverOptions) -> Self {
        tracing::debug!(plc_directory = %opts.plc_directory, "identity resolver created");
        Self {
            http,
            opts,
            dns: None,
        }
    }

    /// Enable DNS TXT resolution using the system configuration.
    pub fn with_system_dns(mut self) -> Self {
        let mut dns_opts = ResolverOpts::default();
        dns_opts.timeout = self.opts.dns_timeout;
        self.dns = Some(Arc::new(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            dns_opts,
        )));
        self
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.opts
    }

    async fn get(&self, url: Url) -> Result<(StatusCode, Vec<u8>)> {
        let req = http::Request::builder()
            .uri(url.as_str())
            .body(Vec::new())
            .map_err(|e| IdentityError::transport(e))?;
        let resp = self.http.send_http(req).await?;
        Ok((resp.status(), resp.into_body()))
    }

    /// TXT records at `_atproto.<handle>`, bounded by the DNS timeout.
    /// `None` means the lookup could not be completed (no resolver, NXDOMAIN,
    /// timeout); the caller decides whether to fall back.
    async fn dns_txt(&self, handle: &Handle) -> Option<Vec<String>> {
        let dns = self.dns.as_ref()?;
        let fqdn = format!("_atproto.{}.", handle.as_str());
        let lookup = tokio::time::timeout(self.opts.dns_timeout, dns.txt_lookup(fqdn)).await;
        match lookup {
            Ok(Ok(records)) => {
                let mut out = Vec::new();
                for txt in records.iter() {
                    let joined: String = txt
                        .txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect();
                    out.push(joined);
                }
                Some(out)
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "DNS TXT lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!("DNS TXT lookup timed out");
                None
            }
        }
    }

    /// GET `https://<handle>/.well-known/atproto-did`; the trimmed body must
    /// be a valid DID.
    async fn resolve_handle_well_known(&self, handle: &Handle) -> Result<Did> {
        let url = Url::parse(&format!(
            "https://{}/.well-known/atproto-did",
            handle.as_str()
        ))?;
        let (status, body) = self.get(url).await?;
        if status != StatusCode::OK {
            return Err(IdentityError::http_status(status)
                .with_context(format!("resolving handle {handle}")));
        }
        let text = String::from_utf8_lossy(&body);
        Did::new(text.trim()).map_err(|_| IdentityError::invalid_well_known())
    }

    /// Construct the document URL for a `did:web` DID.
    ///
    /// - `did:web:example.com` → `https://example.com/.well-known/did.json`
    /// - `did:web:example.com:user:alice` → `https://example.com/user/alice/did.json`
    fn did_web_url(did: &Did) -> Result<Url> {
        let identifier = did.identifier();
        match identifier.split_once(':') {
            None => Ok(Url::parse(&format!(
                "https://{identifier}/.well-known/did.json"
            ))?),
            Some((domain, path)) => {
                let path = path.replace(':', "/");
                Ok(Url::parse(&format!("https://{domain}/{path}/did.json"))?)
            }
        }
    }

    fn plc_url(&self, did: &Did) -> Result<Url> {
        // Url::join would drop the path when the base lacks a trailing
        // slash, so build the URL textually.
        let base = self.opts.plc_directory.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{}", did.as_str()))?)
    }

    /// DID document must declare the exact PDS URL (modulo normalization).
    pub async fn verify_pds_binding(&self, did: &Did, pds: &Url) -> Result<()> {
        let doc = self.get_did_info(did).await?;
        let declared = pds_url_from_doc(&doc)?;
        let expected = normalize_service_url(&declared);
        let actual = normalize_service_url(pds);
        if expected != actual {
            return Err(IdentityError::validation("pds", expected, actual));
        }
        Ok(())
    }

    /// DID document's `alsoKnownAs` must carry the `at://<handle>` alias.
    pub async fn verify_handle_binding(&self, handle: &Handle, did: &Did) -> Result<()> {
        let doc = self.get_did_info(did).await?;
        if !doc.has_handle_alias(handle) {
            return Err(IdentityError::validation(
                "handle",
                handle.as_aka_uri(),
                doc.also_known_as.join(", "),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<H: HttpClient> IdentityResolver for TwillResolver<H> {
    async fn resolve_handle(&self, handle: &Handle) -> Result<Did> {
        if let Some(records) = self.dns_txt(handle).await {
            if let Some(value) = records.iter().find_map(|txt| txt.strip_prefix("did=")) {
                // A published but invalid record is an error, not a reason
                // to consult the well-known fallback.
                return Did::new(value).map_err(|e| {
                    IdentityError::from(e).with_context(format!("DNS TXT for {handle}"))
                });
            }
        }
        self.resolve_handle_well_known(handle).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(did = %did))]
    async fn get_did_info(&self, did: &Did) -> Result<DidDocument> {
        let url = match did.method() {
            "plc" => self.plc_url(did)?,
            "web" => Self::did_web_url(did)?,
            _ => return Err(IdentityError::unsupported_did_method(did.as_str())),
        };
        let (status, body) = self.get(url).await?;
        if status != StatusCode::OK {
            return Err(
                IdentityError::http_status(status).with_context(format!("fetching {did} document"))
            );
        }
        let doc: DidDocument = serde_json::from_slice(&body)?;
        if doc.id != *did {
            return Err(IdentityError::validation(
                "did",
                did.as_str(),
                doc.id.as_str(),
            ));
        }
        // Fail early if the declared PDS is unusable.
        pds_url_from_doc(&doc)?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;
    use twill_common::HttpError;

    struct MockClient {
        responses: Mutex<VecDeque<http::Response<Vec<u8>>>>,
        requests: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn new(responses: Vec<http::Response<Vec<u8>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn json(status: u16, body: &str) -> http::Response<Vec<u8>> {
            http::Response::builder()
                .status(status)
                .body(body.as_bytes().to_vec())
                .unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn send_http(
            &self,
            request: http::Request<Vec<u8>>,
        ) -> std::result::Result<http::Response<Vec<u8>>, HttpError> {
            self.requests.lock().await.push(request.uri().to_string());
            Ok(self
                .responses
                .lock()
                .await
                .pop_front()
                .expect("unexpected request"))
        }
    }

    const PLC_DOC: &str = r#"{
        "id": "did:plc:abc",
        "alsoKnownAs": ["at://alice.test"],
        "pds": "https://pds.test"
    }"#;

    #[tokio::test]
    async fn handle_resolves_via_well_known_without_dns() {
        let client = MockClient::new(vec![MockClient::json(200, "did:plc:abc\n")]);
        let resolver = TwillResolver::new(client);
        let did = resolver
            .resolve_handle(&Handle::new("alice.test").unwrap())
            .await
            .unwrap();
        assert_eq!(did.as_str(), "did:plc:abc");
        assert_eq!(
            resolver.http.requests.lock().await[0],
            "https://alice.test/.well-known/atproto-did"
        );
    }

    #[tokio::test]
    async fn well_known_garbage_is_invalid() {
        let client = MockClient::new(vec![MockClient::json(200, "not a did")]);
        let resolver = TwillResolver::new(client);
        let err = resolver
            .resolve_handle(&Handle::new("alice.test").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            resolver::IdentityErrorKind::InvalidWellKnown
        ));
    }

    #[tokio::test]
    async fn plc_document_fetch_and_validate() {
        let client = MockClient::new(vec![MockClient::json(200, PLC_DOC)]);
        let resolver = TwillResolver::new(client);
        let doc = resolver
            .get_did_info(&Did::new("did:plc:abc").unwrap())
            .await
            .unwrap();
        assert_eq!(doc.pds_endpoint(), Some("https://pds.test"));
        assert_eq!(
            resolver.http.requests.lock().await[0],
            "https://plc.directory/did:plc:abc"
        );
    }

    #[tokio::test]
    async fn document_id_mismatch_rejected() {
        let doc = r#"{"id": "did:plc:other", "pds": "https://pds.test"}"#;
        let client = MockClient::new(vec![MockClient::json(200, doc)]);
        let resolver = TwillResolver::new(client);
        let err = resolver
            .get_did_info(&Did::new("did:plc:abc").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            resolver::IdentityErrorKind::Validation { binding: "did", .. }
        ));
    }

    #[tokio::test]
    async fn plain_http_pds_rejected() {
        let doc = r#"{"id": "did:plc:abc", "pds": "http://pds.test"}"#;
        let client = MockClient::new(vec![MockClient::json(200, doc)]);
        let resolver = TwillResolver::new(client);
        assert!(
            resolver
                .get_did_info(&Did::new("did:plc:abc").unwrap())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn pds_binding_normalizes_urls() {
        let client = MockClient::new(vec![
            MockClient::json(200, PLC_DOC),
            MockClient::json(200, PLC_DOC),
        ]);
        let resolver = TwillResolver::new(client);
        let did = Did::new("did:plc:abc").unwrap();
        resolver
            .verify_pds_binding(&did, &Url::parse("https://pds.test:443/").unwrap())
            .await
            .unwrap();
        let err = resolver
            .verify_pds_binding(&did, &Url::parse("https://evil.test").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            resolver::IdentityErrorKind::Validation { binding: "pds", .. }
        ));
    }

    #[tokio::test]
    async fn handle_binding_checks_alias() {
        let client = MockClient::new(vec![
            MockClient::json(200, PLC_DOC),
            MockClient::json(200, PLC_DOC),
        ]);
        let resolver = TwillResolver::new(client);
        let did = Did::new("did:plc:abc").unwrap();
        resolver
            .verify_handle_binding(&Handle::new("alice.test").unwrap(), &did)
            .await
            .unwrap();
        assert!(
            resolver
                .verify_handle_binding(&Handle::new("mallory.test").unwrap(), &did)
                .await
                .is_err()
        );
    }

    #[test]
    fn did_web_urls() {
        let url = TwillResolver::<MockClient>::did_web_url(&Did::new("did:web:example.com").unwrap())
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/.well-known/did.json");
        let url = TwillResolver::<MockClient>::did_web_url(
            &Did::new("did:web:example.com:user:alice").unwrap(),
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://example.com/user/alice/did.json");
    }
}
