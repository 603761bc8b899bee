//! DPoP client: proof generation, nonce absorption, and the
//! single-retry `use_dpop_nonce` handshake.

pub mod keys;
pub mod nonce;
pub mod proof;

use http::{Request, Response};

pub use keys::{DpopKey, KeyError};
pub use nonce::{NonceManager, StoredNonce};
pub use proof::{build_proof, normalize_htu};

use http::header::InvalidHeaderValue;
use url::Url;

use twill_common::{HttpClient, HttpError};

use crate::envelope::EnvelopeError;
use crate::origin::OriginError;
use crate::storage::StorageError;

/// Everything that can go wrong while proving possession.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DpopError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Origin(#[from] OriginError),

    #[error("proof signing failed")]
    #[diagnostic(code(twill_oauth::dpop::signing))]
    Signing(#[from] serde_json::Error),

    #[error("proof is not a valid header value")]
    #[diagnostic(code(twill_oauth::dpop::header))]
    Header(#[from] InvalidHeaderValue),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] HttpError),

    #[error("request uri is invalid: {0}")]
    #[diagnostic(code(twill_oauth::dpop::uri))]
    InvalidUri(String),
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

/// Facade binding the keypair and nonce store together.
#[derive(Clone)]
pub struct DpopClient {
    key: DpopKey,
    nonces: NonceManager,
}

impl DpopClient {
    pub fn new(key: DpopKey, nonces: NonceManager) -> Self {
        Self { key, nonces }
    }

    pub fn key(&self) -> &DpopKey {
        &self.key
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    /// Build a proof for `method url`. When no nonce is supplied the
    /// stored nonce for the server origin is used, if any.
    pub async fn generate_proof(
        &self,
        method: &str,
        url: &Url,
        access_token: Option<&str>,
        nonce: Option<String>,
    ) -> Result<String, DpopError> {
        let nonce = match nonce {
            Some(nonce) => Some(nonce),
            None => self.nonces.get(url).await,
        };
        Ok(build_proof(&self.key, method, url, nonce, access_token)?)
    }

    /// Absorb a `DPoP-Nonce` response header (header lookup is
    /// case-insensitive) into the per-server store.
    pub async fn process_response(
        &self,
        headers: &http::HeaderMap,
        server_url: &Url,
    ) -> Result<(), DpopError> {
        if let Some(nonce) = headers.get("DPoP-Nonce").and_then(|v| v.to_str().ok()) {
            self.nonces.update(nonce, server_url).await?;
        }
        Ok(())
    }

    /// Send a request with a `DPoP` header attached, absorbing nonce
    /// rotations and retrying exactly once when the server answers with a
    /// `use_dpop_nonce` challenge.
    pub async fn send<H: HttpClient>(
        &self,
        http: &H,
        mut request: Request<Vec<u8>>,
        access_token: Option<&str>,
    ) -> Result<Response<Vec<u8>>, DpopError> {
        let url = Url::parse(&request.uri().to_string())
            .map_err(|e| DpopError::InvalidUri(e.to_string()))?;
        let method = request.method().as_str().to_owned();

        let proof = self.generate_proof(&method, &url, access_token, None).await?;
        request.headers_mut().insert("DPoP", proof.parse()?);
        let response = http.send_http(request.clone()).await?;
        self.process_response(response.headers(), &url).await?;

        if !is_use_dpop_nonce_error(&response) {
            return Ok(response);
        }
        // The challenge's nonce was just absorbed; rebuild and go again.
        let proof = self.generate_proof(&method, &url, access_token, None).await?;
        request.headers_mut().insert("DPoP", proof.parse()?);
        let response = http.send_http(request).await?;
        self.process_response(response.headers(), &url).await?;
        Ok(response)
    }
}

/// Nonce challenge detection: authorization servers answer HTTP 400 with
/// a JSON `error` of `use_dpop_nonce` (RFC 9449 §8), resource servers
/// answer 401 with a `WWW-Authenticate: DPoP … error="use_dpop_nonce"`
/// header (§7).
pub fn is_use_dpop_nonce_error(response: &Response<Vec<u8>>) -> bool {
    if response.status() == http::StatusCode::BAD_REQUEST {
        if let Ok(body) = serde_json::from_slice::<ErrorBody>(response.body()) {
            return body.error == "use_dpop_nonce";
        }
    }
    if response.status() == http::StatusCode::UNAUTHORIZED {
        if let Some(www) = response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
        {
            return www.starts_with("DPoP") && www.contains(r#"error="use_dpop_nonce""#);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoService;
    use crate::envelope::RecordCodec;
    use crate::storage::memory::MemoryStorage;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn client() -> DpopClient {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).unwrap();
        DpopClient::new(
            DpopKey::generate().unwrap(),
            NonceManager::new(
                Arc::new(MemoryStorage::new()),
                RecordCodec::new(Arc::new(CryptoService::new(key))),
                nonce::DEFAULT_NONCE_TTL,
            ),
        )
    }

    struct MockHttp {
        responses: Mutex<VecDeque<Response<Vec<u8>>>>,
        proofs: Mutex<Vec<String>>,
    }

    impl MockHttp {
        fn new(responses: Vec<Response<Vec<u8>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                proofs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn send_http(
            &self,
            request: Request<Vec<u8>>,
        ) -> Result<Response<Vec<u8>>, HttpError> {
            let proof = request
                .headers()
                .get("DPoP")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            self.proofs.lock().await.push(proof);
            Ok(self.responses.lock().await.pop_front().unwrap())
        }
    }

    fn proof_nonce(proof: &str) -> Option<String> {
        let payload = proof.split('.').nth(1)?;
        let json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
        json.get("nonce")?.as_str().map(ToOwned::to_owned)
    }

    #[tokio::test]
    async fn retries_once_on_nonce_challenge() {
        let challenge = Response::builder()
            .status(400)
            .header("DPoP-Nonce", "N1")
            .body(br#"{"error":"use_dpop_nonce"}"#.to_vec())
            .unwrap();
        let created = Response::builder()
            .status(201)
            .body(br#"{"request_uri":"urn:x","expires_in":60}"#.to_vec())
            .unwrap();
        let http = MockHttp::new(vec![challenge, created]);
        let dpop = client();

        let request = Request::builder()
            .method("POST")
            .uri("https://auth.test/oauth/par")
            .body(Vec::new())
            .unwrap();
        let response = dpop.send(&http, request, None).await.unwrap();
        assert_eq!(response.status(), 201);

        let proofs = http.proofs.lock().await;
        assert_eq!(proofs.len(), 2);
        assert_eq!(proof_nonce(&proofs[0]), None);
        assert_eq!(proof_nonce(&proofs[1]).as_deref(), Some("N1"));

        // The nonce sticks around for future proofs against this server.
        let url = Url::parse("https://auth.test/oauth/token").unwrap();
        assert_eq!(dpop.nonces().get(&url).await.as_deref(), Some("N1"));
    }

    #[tokio::test]
    async fn does_not_retry_other_errors() {
        let denied = Response::builder()
            .status(400)
            .body(br#"{"error":"invalid_request"}"#.to_vec())
            .unwrap();
        let http = MockHttp::new(vec![denied]);
        let dpop = client();
        let request = Request::builder()
            .method("POST")
            .uri("https://auth.test/oauth/par")
            .body(Vec::new())
            .unwrap();
        let response = dpop.send(&http, request, None).await.unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(http.proofs.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn absorbs_nonce_from_success_responses() {
        let ok = Response::builder()
            .status(200)
            .header("dpop-nonce", "N2")
            .body(Vec::new())
            .unwrap();
        let http = MockHttp::new(vec![ok]);
        let dpop = client();
        let request = Request::builder()
            .method("GET")
            .uri("https://pds.test/xrpc/query")
            .body(Vec::new())
            .unwrap();
        dpop.send(&http, request, Some("token")).await.unwrap();
        let url = Url::parse("https://pds.test/other").unwrap();
        assert_eq!(dpop.nonces().get(&url).await.as_deref(), Some("N2"));
    }

    #[tokio::test]
    async fn resource_server_challenge_detected() {
        let challenge = Response::builder()
            .status(401)
            .header("WWW-Authenticate", r#"DPoP error="use_dpop_nonce""#)
            .header("DPoP-Nonce", "N3")
            .body(Vec::new())
            .unwrap();
        let ok = Response::builder().status(200).body(Vec::new()).unwrap();
        let http = MockHttp::new(vec![challenge, ok]);
        let dpop = client();
        let request = Request::builder()
            .method("GET")
            .uri("https://pds.test/xrpc/query")
            .body(Vec::new())
            .unwrap();
        let response = dpop.send(&http, request, Some("tok")).await.unwrap();
        assert_eq!(response.status(), 200);
        let proofs = http.proofs.lock().await;
        assert_eq!(proofs.len(), 2);
        assert_eq!(proof_nonce(&proofs[1]).as_deref(), Some("N3"));
    }
}
