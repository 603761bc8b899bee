//! Shared test fixtures: a scripted HTTP client and valid metadata
//! builders.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use twill_common::{HttpClient, HttpError};

use crate::crypto::CryptoService;
use crate::envelope::RecordCodec;
use crate::types::{AuthorizationServerMetadata, ClientMetadata};

/// Scripted [`HttpClient`]: pops one queued response per request and
/// records what was sent.
pub(crate) struct MockHttp {
    responses: Mutex<VecDeque<http::Response<Vec<u8>>>>,
    pub(crate) requests: Mutex<Vec<http::Request<Vec<u8>>>>,
}

impl MockHttp {
    pub(crate) fn new(responses: Vec<http::Response<Vec<u8>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn queue(bodies: Vec<(u16, String)>) -> Self {
        Self::new(
            bodies
                .into_iter()
                .map(|(status, body)| response(status, &body))
                .collect(),
        )
    }

    pub(crate) async fn push(&self, resp: http::Response<Vec<u8>>) {
        self.responses.lock().await.push_back(resp);
    }

    pub(crate) async fn request_uris(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|r| r.uri().to_string())
            .collect()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpError> {
        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request to {}", request.uri()));
        self.requests.lock().await.push(request);
        Ok(response)
    }
}

pub(crate) fn response(status: u16, body: &str) -> http::Response<Vec<u8>> {
    http::Response::builder()
        .status(status)
        .body(body.as_bytes().to_vec())
        .unwrap()
}

pub(crate) fn response_with_header(
    status: u16,
    name: &str,
    value: &str,
    body: &str,
) -> http::Response<Vec<u8>> {
    http::Response::builder()
        .status(status)
        .header(name, value)
        .body(body.as_bytes().to_vec())
        .unwrap()
}

pub(crate) fn crypto() -> Arc<CryptoService> {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).unwrap();
    Arc::new(CryptoService::new(key))
}

pub(crate) fn codec() -> RecordCodec {
    RecordCodec::new(crypto())
}

pub(crate) fn valid_client_metadata() -> ClientMetadata {
    serde_json::from_value(serde_json::json!({
        "client_id": "https://app.test/oauth/client-metadata.json",
        "grant_types": ["authorization_code", "refresh_token"],
        "response_types": ["code"],
        "redirect_uris": ["https://app.test/oauth/callback"],
        "scope": "atproto",
        "dpop_bound_access_tokens": true,
        "token_endpoint_auth_method": "none"
    }))
    .unwrap()
}

pub(crate) fn server_metadata_json(issuer: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/oauth/authorize"),
        "token_endpoint": format!("{issuer}/oauth/token"),
        "pushed_authorization_request_endpoint": format!("{issuer}/oauth/par"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["private_key_jwt", "none"],
        "token_endpoint_auth_signing_alg_values_supported": ["ES256"],
        "dpop_signing_alg_values_supported": ["ES256"],
        "scopes_supported": ["atproto"],
        "authorization_response_iss_parameter_supported": true,
        "require_pushed_authorization_requests": true,
        "client_id_metadata_document_supported": true
    })
}

pub(crate) fn valid_server_metadata() -> AuthorizationServerMetadata {
    serde_json::from_value(server_metadata_json("https://auth.test")).unwrap()
}

pub(crate) fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
