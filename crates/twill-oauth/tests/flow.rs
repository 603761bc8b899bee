//! End-to-end flows through the public API against a scripted server.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use twill_oauth::client::OAuthClient;
use twill_oauth::common::{HttpClient, HttpError};
use twill_oauth::config::OAuthConfig;
use twill_oauth::crypto::CryptoService;
use twill_oauth::error::OAuthError;
use twill_oauth::identity::{ResolverOptions, TwillResolver};
use twill_oauth::storage::Storage;
use twill_oauth::storage::memory::MemoryStorage;
use twill_oauth::types::{AuthorizeOptions, CallbackParams};
use twill_oauth::{metadata, namespace};

/// Pops one canned response per request, recording what was sent.
struct ScriptedHttp {
    responses: Mutex<VecDeque<http::Response<Vec<u8>>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    async fn push(&self, status: u16, body: &str) {
        self.responses.lock().await.push_back(
            http::Response::builder()
                .status(status)
                .body(body.as_bytes().to_vec())
                .unwrap(),
        );
    }

    async fn push_with_header(&self, status: u16, name: &str, value: &str, body: &str) {
        self.responses.lock().await.push_back(
            http::Response::builder()
                .status(status)
                .header(name, value)
                .body(body.as_bytes().to_vec())
                .unwrap(),
        );
    }

    async fn sent(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpError> {
        self.requests.lock().await.push(request.uri().to_string());
        Ok(self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response for {}", request.uri())))
    }
}

fn client_metadata() -> twill_oauth::types::ClientMetadata {
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

fn auth_server_doc() -> String {
    serde_json::json!({
        "issuer": "https://auth.test",
        "authorization_endpoint": "https://auth.test/oauth/authorize",
        "token_endpoint": "https://auth.test/oauth/token",
        "pushed_authorization_request_endpoint": "https://auth.test/oauth/par",
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
    .to_string()
}

const PLC_DOC: &str = r#"{
    "id": "did:plc:abc",
    "alsoKnownAs": ["at://alice.test"],
    "pds": "https://pds.test"
}"#;

const RESOURCE_DOC: &str = r#"{"authorization_servers": ["https://auth.test"]}"#;

fn token_doc() -> String {
    serde_json::json!({
        "access_token": "access-1",
        "token_type": "DPoP",
        "expires_in": 3600,
        "refresh_token": "refresh-1",
        "scope": "atproto",
        "sub": "did:plc:abc"
    })
    .to_string()
}

async fn queue_discovery(http: &ScriptedHttp) {
    http.push(200, "did:plc:abc").await;
    http.push(200, PLC_DOC).await;
    http.push(200, RESOURCE_DOC).await;
    http.push(200, &auth_server_doc()).await;
}

type TestClient = OAuthClient<ScriptedHttp, TwillResolver<Arc<ScriptedHttp>>>;

async fn build_client(
    http: ScriptedHttp,
    storage: Arc<MemoryStorage>,
    master_key: [u8; 32],
) -> (TestClient, Arc<ScriptedHttp>) {
    let http = Arc::new(http);
    let resolver = TwillResolver::with_options(http.clone(), ResolverOptions::default());
    let client = OAuthClient::with_parts(
        OAuthConfig::new(client_metadata()).unwrap(),
        http.clone(),
        storage,
        resolver,
        Arc::new(CryptoService::new(master_key)),
    )
    .await
    .unwrap();
    (client, http)
}

#[tokio::test]
async fn full_login_flow_with_encrypted_state() {
    let storage = Arc::new(MemoryStorage::new());
    let (client, http) = build_client(ScriptedHttp::new(), storage.clone(), [7u8; 32]).await;

    queue_discovery(&http).await;
    http.push(201, r#"{"request_uri":"urn:x","expires_in":60}"#)
        .await;
    let outcome = client
        .authorize(AuthorizeOptions {
            handle: Some("alice.test".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(
        outcome
            .url
            .as_str()
            .starts_with("https://auth.test/oauth/authorize?request_uri=")
    );

    // The session envelope is on disk, encrypted: no PKCE verifier or
    // token material in the clear.
    let raw = storage
        .get(&namespace::session_key(&outcome.session_id))
        .await
        .unwrap()
        .expect("session stored");
    assert!(raw.contains("\"version\":1") || raw.contains("\"version\": 1"));
    assert!(!raw.contains("access-1"));

    let state = extract_state(&raw);
    assert_eq!(
        storage.get(&namespace::state_key(&state)).await.unwrap(),
        Some(outcome.session_id.clone())
    );

    http.push(200, &token_doc()).await;
    let summary = client
        .handle_callback(CallbackParams {
            code: "code-1".into(),
            state,
            iss: "https://auth.test".into(),
        })
        .await
        .unwrap();
    assert_eq!(summary.did.as_str(), "did:plc:abc");
    assert!(client.authorized(&outcome.session_id).await);

    // Token material never hits storage in the clear either.
    let raw = storage
        .get(&namespace::session_key(&outcome.session_id))
        .await
        .unwrap()
        .unwrap();
    assert!(!raw.contains("access-1"));
    assert!(!raw.contains("refresh-1"));

    let sent = http.sent().await;
    assert_eq!(sent.last().unwrap(), "https://auth.test/oauth/token");
}

/// The state token lives inside the envelope, but it is not sensitive
/// (it is the plain half of the state→id mapping), so the stored JSON
/// carries it in the clear.
fn extract_state(raw_session: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(raw_session).unwrap();
    value["data"]["state_token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn par_nonce_handshake_retries_once() {
    let storage = Arc::new(MemoryStorage::new());
    let (client, http) = build_client(ScriptedHttp::new(), storage, [9u8; 32]).await;

    queue_discovery(&http).await;
    http.push_with_header(400, "DPoP-Nonce", "N1", r#"{"error":"use_dpop_nonce"}"#)
        .await;
    http.push(201, r#"{"request_uri":"urn:x","expires_in":60}"#)
        .await;

    let outcome = client
        .authorize(AuthorizeOptions {
            handle: Some("alice.test".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(outcome.url.as_str().contains("request_uri="));

    // Exactly two PAR posts: the challenge and the nonce-carrying retry.
    let sent = http.sent().await;
    let par_posts = sent
        .iter()
        .filter(|uri| *uri == "https://auth.test/oauth/par")
        .count();
    assert_eq!(par_posts, 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_backoff_gives_up_after_three_attempts() {
    let storage = Arc::new(MemoryStorage::new());
    let (client, http) = build_client(ScriptedHttp::new(), storage.clone(), [3u8; 32]).await;
    let session_id = login_with_state(&client, &http, &storage).await;

    http.push(500, "").await;
    http.push(500, "").await;
    http.push(500, "").await;
    let err = client.refresh_token(&session_id).await.unwrap_err();
    match err {
        OAuthError::Refresh(e) => {
            assert!(!e.retry_possible());
            assert!(e.to_string().contains("after 3 attempts"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn refresh_invalid_grant_fails_without_retry() {
    let storage = Arc::new(MemoryStorage::new());
    let (client, http) = build_client(ScriptedHttp::new(), storage.clone(), [4u8; 32]).await;
    let session_id = login_with_state(&client, &http, &storage).await;

    let before = http.sent().await.len();
    http.push(400, r#"{"error":"invalid_grant"}"#).await;
    let err = client.refresh_token(&session_id).await.unwrap_err();
    match err {
        OAuthError::Refresh(e) => assert!(!e.retry_possible()),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(http.sent().await.len(), before + 1);

    // The session survives; its (now dead) tokens are still readable.
    assert!(client.get_tokens(&session_id).await.is_some());
}

#[tokio::test]
async fn restart_reuses_dpop_key_and_sessions() {
    let storage = Arc::new(MemoryStorage::new());
    let master_key = [11u8; 32];
    let (client, http) = build_client(ScriptedHttp::new(), storage.clone(), master_key).await;
    let session_id = login_with_state(&client, &http, &storage).await;

    let key_record = storage
        .get(&namespace::dpop_key("https://app.test/oauth/client-metadata.json"))
        .await
        .unwrap()
        .expect("dpop key persisted");
    drop(client);

    // A new process: same storage, same master key.
    let (client, _http) = build_client(ScriptedHttp::new(), storage.clone(), master_key).await;
    assert!(client.authorized(&session_id).await);
    let headers = client
        .auth_headers(
            &session_id,
            "GET",
            &Url::parse("https://pds.test/xrpc/q").unwrap(),
        )
        .await
        .unwrap();
    assert!(headers.contains_key("DPoP"));

    // The persisted keypair was reloaded, not rotated.
    let key_record_after = storage
        .get(&namespace::dpop_key("https://app.test/oauth/client-metadata.json"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key_record, key_record_after);
}

#[tokio::test]
async fn ssrf_guard_refuses_private_metadata_hosts() {
    let guarded = twill_oauth::GuardedClient::new().unwrap();
    let url = Url::parse("https://192.168.0.1/meta.json").unwrap();
    let err = metadata::fetch_client_metadata(&guarded, &url)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        metadata::ClientMetadataError::Http(HttpError::Ssrf(_))
    ));
}

/// Run a full login and return the session id, reading the state token
/// out of the stored (non-sensitive) envelope field the way
/// `full_login_flow_with_encrypted_state` does.
async fn login_with_state(
    client: &TestClient,
    http: &ScriptedHttp,
    storage: &Arc<MemoryStorage>,
) -> String {
    queue_discovery(http).await;
    http.push(201, r#"{"request_uri":"urn:x","expires_in":60}"#)
        .await;
    let outcome = client
        .authorize(AuthorizeOptions {
            handle: Some("alice.test".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let raw = storage
        .get(&namespace::session_key(&outcome.session_id))
        .await
        .unwrap()
        .unwrap();
    let state = extract_state(&raw);

    http.push(200, &token_doc()).await;
    client
        .handle_callback(CallbackParams {
            code: "code-1".into(),
            state,
            iss: "https://auth.test".into(),
        })
        .await
        .unwrap();
    outcome.session_id
}
