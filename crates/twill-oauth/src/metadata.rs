//! Discovery document fetching and validation.
//!
//! Client metadata (C3) and server metadata (C4) share a theme: fetch a
//! JSON document from a well-known location, then hold it to the AT
//! Protocol OAuth profile before anything downstream may trust it.

use http::StatusCode;
use jose_jwk::{Class, Jwk, Operations};
use serde::de::DeserializeOwned;
use url::Url;

use twill_common::{HttpClient, HttpError};

use crate::origin::{OriginError, validate_origin_url};
use crate::types::{
    ApplicationType, AuthMethod, AuthorizationServerMetadata, ClientMetadata,
    ResourceServerMetadata,
};

pub const WELL_KNOWN_PROTECTED_RESOURCE: &str = "/.well-known/oauth-protected-resource";
pub const WELL_KNOWN_AUTHORIZATION_SERVER: &str = "/.well-known/oauth-authorization-server";

pub const ES256: &str = "ES256";
pub const SCOPE_ATPROTO: &str = "atproto";

/// `InvalidClientMetadata` family.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[diagnostic(code(twill_oauth::invalid_client_metadata))]
pub enum ClientMetadataError {
    #[error("client metadata URL must be https (or http on localhost): {0}")]
    InsecureMetadataUrl(Url),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("client metadata fetch returned HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("client metadata is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("metadata `client_id` {found} does not match document URL {expected}")]
    ClientIdMismatch { expected: Url, found: Url },

    #[error("`grant_types` must include `authorization_code`")]
    MissingAuthorizationCodeGrant,

    #[error("unsupported grant type {0:?}")]
    UnsupportedGrantType(String),

    #[error("`response_types` must include `code`")]
    MissingCodeResponseType,

    #[error("`redirect_uris` must not be empty")]
    EmptyRedirectUris,

    #[error("invalid redirect_uri for {application_type:?} client: {uri}")]
    InvalidRedirectUri {
        application_type: ApplicationType,
        uri: String,
    },

    #[error("`scope` must include `atproto`")]
    MissingAtprotoScope,

    #[error("`dpop_bound_access_tokens` must be true")]
    DpopNotBound,

    #[error("`client_uri` must share its host with `client_id`")]
    ClientUriHostMismatch,

    #[error("`{field}` must be https: {uri}")]
    InsecureUri { field: &'static str, uri: Url },

    #[error("`private_key_jwt` requires `token_endpoint_auth_signing_alg` of ES256")]
    AuthSigningAlg,

    #[error("`private_key_jwt` requires exactly one of `jwks` or `jwks_uri`")]
    JwksChoice,

    #[error("every JWK must carry a `kid`")]
    JwkMissingKid,

    #[error("JWK {kid} must declare `use: sig` or `key_ops` containing `sign`")]
    JwkNotSigning { kid: String },
}

/// `InvalidAuthorizationServer` family.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[diagnostic(code(twill_oauth::invalid_authorization_server))]
pub enum ServerMetadataError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("metadata fetch returned HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("metadata is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("resource server must list exactly one authorization server, found {0}")]
    AuthorizationServerCount(usize),

    #[error("authorization server entry is not a valid origin URL")]
    InvalidAuthorizationServerOrigin(#[source] OriginError),

    #[error("metadata `issuer` {found} does not match requested issuer {expected}")]
    IssuerMismatch { expected: Url, found: Url },

    #[error("issuer is not a valid origin URL")]
    InvalidIssuerOrigin(#[source] OriginError),

    #[error("`{0}` endpoint is required and must be https")]
    BadEndpoint(&'static str),

    #[error("`{field}` must include {required:?}")]
    MissingCapability {
        field: &'static str,
        required: &'static str,
    },

    #[error("`token_endpoint_auth_signing_alg_values_supported` must not include `none`")]
    NoneSigningAlg,

    #[error("`{0}` must be advertised as true")]
    FlagNotTrue(&'static str),

    #[error("authorization server {actual} does not match expected issuer {expected}")]
    IssuerBinding { expected: String, actual: String },
}

async fn get_json<H: HttpClient, T: DeserializeOwned, E>(
    http: &H,
    url: &Url,
    wrap_http: impl Fn(HttpError) -> E,
    wrap_status: impl Fn(StatusCode) -> E,
    wrap_json: impl Fn(serde_json::Error) -> E,
) -> Result<T, E> {
    let request = http::Request::builder()
        .uri(url.as_str())
        .header("Accept", "application/json")
        .body(Vec::new())
        .expect("valid request");
    let response = http.send_http(request).await.map_err(wrap_http)?;
    if response.status() != StatusCode::OK {
        return Err(wrap_status(response.status()));
    }
    serde_json::from_slice(response.body()).map_err(wrap_json)
}

/// Fetch and validate the client's metadata document. The document's
/// `client_id` must equal the URL it was fetched from.
pub async fn fetch_client_metadata<H: HttpClient>(
    http: &H,
    url: &Url,
) -> Result<ClientMetadata, ClientMetadataError> {
    let localhost = url
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case("localhost"));
    if !(url.scheme() == "https" || (url.scheme() == "http" && localhost)) {
        return Err(ClientMetadataError::InsecureMetadataUrl(url.clone()));
    }
    let metadata: ClientMetadata = get_json(
        http,
        url,
        ClientMetadataError::Http,
        ClientMetadataError::HttpStatus,
        ClientMetadataError::Json,
    )
    .await?;
    if metadata.client_id != *url {
        return Err(ClientMetadataError::ClientIdMismatch {
            expected: url.clone(),
            found: metadata.client_id,
        });
    }
    validate_client_metadata(&metadata)?;
    Ok(metadata)
}

/// Enforce the AT Protocol client-metadata profile.
pub fn validate_client_metadata(metadata: &ClientMetadata) -> Result<(), ClientMetadataError> {
    if !metadata
        .grant_types
        .iter()
        .any(|g| g == "authorization_code")
    {
        return Err(ClientMetadataError::MissingAuthorizationCodeGrant);
    }
    if let Some(unknown) = metadata
        .grant_types
        .iter()
        .find(|g| *g != "authorization_code" && *g != "refresh_token")
    {
        return Err(ClientMetadataError::UnsupportedGrantType(unknown.clone()));
    }
    if !metadata.response_types.iter().any(|r| r == "code") {
        return Err(ClientMetadataError::MissingCodeResponseType);
    }
    if metadata.redirect_uris.is_empty() {
        return Err(ClientMetadataError::EmptyRedirectUris);
    }
    for uri in &metadata.redirect_uris {
        validate_redirect_uri(metadata, uri)?;
    }
    if !metadata.scopes().any(|s| s == SCOPE_ATPROTO) {
        return Err(ClientMetadataError::MissingAtprotoScope);
    }
    if !metadata.dpop_bound_access_tokens {
        return Err(ClientMetadataError::DpopNotBound);
    }
    if let Some(client_uri) = &metadata.client_uri {
        if client_uri.host_str() != metadata.client_id.host_str() {
            return Err(ClientMetadataError::ClientUriHostMismatch);
        }
    }
    for (field, uri) in [
        ("logo_uri", &metadata.logo_uri),
        ("tos_uri", &metadata.tos_uri),
        ("policy_uri", &metadata.policy_uri),
    ] {
        if let Some(uri) = uri {
            if uri.scheme() != "https" {
                return Err(ClientMetadataError::InsecureUri {
                    field,
                    uri: uri.clone(),
                });
            }
        }
    }
    if metadata.is_confidential() {
        if metadata.token_endpoint_auth_signing_alg.as_deref() != Some(ES256) {
            return Err(ClientMetadataError::AuthSigningAlg);
        }
        match (&metadata.jwks, &metadata.jwks_uri) {
            (Some(jwks), None) => {
                for jwk in &jwks.keys {
                    validate_signing_jwk(jwk)?;
                }
            }
            (None, Some(_)) => {}
            _ => return Err(ClientMetadataError::JwksChoice),
        }
    }
    Ok(())
}

fn validate_signing_jwk(jwk: &Jwk) -> Result<(), ClientMetadataError> {
    let Some(kid) = &jwk.prm.kid else {
        return Err(ClientMetadataError::JwkMissingKid);
    };
    let use_sig = matches!(jwk.prm.cls, Some(Class::Signing));
    let ops_sign = jwk
        .prm
        .ops
        .as_ref()
        .is_some_and(|ops| ops.contains(&Operations::Sign));
    if !(use_sig || ops_sign) {
        return Err(ClientMetadataError::JwkNotSigning { kid: kid.clone() });
    }
    Ok(())
}

/// Loopback hosts a native client may redirect to over plain http.
fn is_native_loopback_host(host: Option<&str>) -> bool {
    matches!(host, Some("127.0.0.1") | Some("[::1]") | Some("::1"))
}

fn validate_redirect_uri(
    metadata: &ClientMetadata,
    uri: &Url,
) -> Result<(), ClientMetadataError> {
    let invalid = || ClientMetadataError::InvalidRedirectUri {
        application_type: metadata.application_type,
        uri: uri.to_string(),
    };
    match metadata.application_type {
        ApplicationType::Web => {
            // HTTPS on the client's own host; plain-http 127.0.0.1 is
            // tolerated for development setups. Web clients do not get
            // the wider native loopback set.
            if uri.scheme() == "http" && uri.host_str() == Some("127.0.0.1") {
                return Ok(());
            }
            if uri.scheme() != "https" || uri.host_str() != metadata.client_id.host_str() {
                return Err(invalid());
            }
            Ok(())
        }
        ApplicationType::Native => {
            if uri.scheme() == "https" {
                return Ok(());
            }
            if uri.scheme() == "http" && is_native_loopback_host(uri.host_str()) {
                return Ok(());
            }
            // Custom scheme: the client_id host reversed, path `/`.
            let Some(host) = metadata.client_id.host_str() else {
                return Err(invalid());
            };
            let reversed: Vec<&str> = host.split('.').rev().collect();
            if uri.scheme() == reversed.join(".") && uri.path() == "/" {
                return Ok(());
            }
            Err(invalid())
        }
    }
}

/// Fetch the resource-server document for a PDS and return its single
/// authorization server as a validated origin URL.
pub async fn fetch_resource_server<H: HttpClient>(
    http: &H,
    pds: &Url,
) -> Result<Url, ServerMetadataError> {
    let url = pds
        .join(WELL_KNOWN_PROTECTED_RESOURCE)
        .map_err(|_| ServerMetadataError::BadEndpoint("oauth-protected-resource"))?;
    let metadata: ResourceServerMetadata = get_json(
        http,
        &url,
        ServerMetadataError::Http,
        ServerMetadataError::HttpStatus,
        ServerMetadataError::Json,
    )
    .await?;
    let [issuer] = metadata.authorization_servers.as_slice() else {
        return Err(ServerMetadataError::AuthorizationServerCount(
            metadata.authorization_servers.len(),
        ));
    };
    validate_origin_url(issuer).map_err(ServerMetadataError::InvalidAuthorizationServerOrigin)
}

/// Fetch and validate the authorization-server document for an issuer.
pub async fn fetch_authorization_server<H: HttpClient>(
    http: &H,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata, ServerMetadataError> {
    let url = issuer
        .join(WELL_KNOWN_AUTHORIZATION_SERVER)
        .map_err(|_| ServerMetadataError::BadEndpoint("oauth-authorization-server"))?;
    let metadata: AuthorizationServerMetadata = get_json(
        http,
        &url,
        ServerMetadataError::Http,
        ServerMetadataError::HttpStatus,
        ServerMetadataError::Json,
    )
    .await?;
    if metadata.issuer != *issuer {
        return Err(ServerMetadataError::IssuerMismatch {
            expected: issuer.clone(),
            found: metadata.issuer,
        });
    }
    validate_authorization_server(&metadata)?;
    Ok(metadata)
}

/// Enforce the AT Protocol authorization-server profile.
pub fn validate_authorization_server(
    metadata: &AuthorizationServerMetadata,
) -> Result<(), ServerMetadataError> {
    validate_origin_url(metadata.issuer.as_str())
        .map_err(ServerMetadataError::InvalidIssuerOrigin)?;

    if metadata.authorization_endpoint.scheme() != "https" {
        return Err(ServerMetadataError::BadEndpoint("authorization_endpoint"));
    }
    if metadata.token_endpoint.scheme() != "https" {
        return Err(ServerMetadataError::BadEndpoint("token_endpoint"));
    }
    match &metadata.pushed_authorization_request_endpoint {
        Some(endpoint) if endpoint.scheme() == "https" => {}
        _ => {
            return Err(ServerMetadataError::BadEndpoint(
                "pushed_authorization_request_endpoint",
            ));
        }
    }

    let contains = |values: &[String], needle: &str| values.iter().any(|v| v == needle);
    let requirements: &[(&'static str, &[String], &'static str)] = &[
        (
            "response_types_supported",
            &metadata.response_types_supported,
            "code",
        ),
        (
            "grant_types_supported",
            &metadata.grant_types_supported,
            "authorization_code",
        ),
        (
            "grant_types_supported",
            &metadata.grant_types_supported,
            "refresh_token",
        ),
        (
            "code_challenge_methods_supported",
            &metadata.code_challenge_methods_supported,
            "S256",
        ),
        (
            "token_endpoint_auth_methods_supported",
            &metadata.token_endpoint_auth_methods_supported,
            "private_key_jwt",
        ),
        (
            "token_endpoint_auth_methods_supported",
            &metadata.token_endpoint_auth_methods_supported,
            "none",
        ),
        (
            "token_endpoint_auth_signing_alg_values_supported",
            &metadata.token_endpoint_auth_signing_alg_values_supported,
            ES256,
        ),
        (
            "dpop_signing_alg_values_supported",
            &metadata.dpop_signing_alg_values_supported,
            ES256,
        ),
        ("scopes_supported", &metadata.scopes_supported, SCOPE_ATPROTO),
    ];
    for &(field, values, required) in requirements {
        if !contains(values, required) {
            return Err(ServerMetadataError::MissingCapability { field, required });
        }
    }
    if contains(
        &metadata.token_endpoint_auth_signing_alg_values_supported,
        "none",
    ) {
        return Err(ServerMetadataError::NoneSigningAlg);
    }
    for (field, value) in [
        (
            "authorization_response_iss_parameter_supported",
            metadata.authorization_response_iss_parameter_supported,
        ),
        (
            "require_pushed_authorization_requests",
            metadata.require_pushed_authorization_requests,
        ),
        (
            "client_id_metadata_document_supported",
            metadata.client_id_metadata_document_supported,
        ),
    ] {
        if value != Some(true) {
            return Err(ServerMetadataError::FlagNotTrue(field));
        }
    }
    Ok(())
}

/// DID↔issuer binding: the PDS's resource-server document must name the
/// expected issuer (modulo origin normalization).
pub async fn verify_issuer_binding<H: HttpClient>(
    http: &H,
    pds: &Url,
    issuer: &Url,
) -> Result<(), ServerMetadataError> {
    let declared = fetch_resource_server(http, pds).await?;
    let expected = twill_identity::types::normalize_service_url(issuer);
    let actual = twill_identity::types::normalize_service_url(&declared);
    if expected != actual {
        return Err(ServerMetadataError::IssuerBinding { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        MockHttp, server_metadata_json, valid_client_metadata, valid_server_metadata,
    };

    #[test]
    fn accepts_valid_client_metadata() {
        validate_client_metadata(&valid_client_metadata()).unwrap();
    }

    #[test]
    fn client_metadata_requirements() {
        let mut m = valid_client_metadata();
        m.grant_types = vec!["refresh_token".into()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::MissingAuthorizationCodeGrant)
        ));

        let mut m = valid_client_metadata();
        m.grant_types.push("implicit".into());
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::UnsupportedGrantType(_))
        ));

        let mut m = valid_client_metadata();
        m.scope = "transition:generic".into();
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::MissingAtprotoScope)
        ));

        let mut m = valid_client_metadata();
        m.dpop_bound_access_tokens = false;
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::DpopNotBound)
        ));

        let mut m = valid_client_metadata();
        m.redirect_uris.clear();
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::EmptyRedirectUris)
        ));

        let mut m = valid_client_metadata();
        m.redirect_uris = vec![Url::parse("https://elsewhere.test/cb").unwrap()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InvalidRedirectUri { .. })
        ));

        let mut m = valid_client_metadata();
        m.client_uri = Some(Url::parse("https://other.test").unwrap());
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::ClientUriHostMismatch)
        ));

        let mut m = valid_client_metadata();
        m.logo_uri = Some(Url::parse("http://app.test/logo.png").unwrap());
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InsecureUri { field: "logo_uri", .. })
        ));
    }

    #[test]
    fn native_redirect_rules() {
        let mut m = valid_client_metadata();
        m.application_type = ApplicationType::Native;
        m.redirect_uris = vec![
            Url::parse("http://127.0.0.1:49152/cb").unwrap(),
            Url::parse("https://app.test/cb").unwrap(),
            Url::parse("test.app:/").unwrap(),
        ];
        validate_client_metadata(&m).unwrap();

        m.redirect_uris = vec![Url::parse("other.scheme:/").unwrap()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InvalidRedirectUri { .. })
        ));

        // Native loopback also covers [::1], over plain http only.
        m.redirect_uris = vec![Url::parse("http://[::1]:49152/cb").unwrap()];
        validate_client_metadata(&m).unwrap();
    }

    #[test]
    fn web_redirect_rules() {
        let mut m = valid_client_metadata();
        m.redirect_uris = vec![Url::parse("http://127.0.0.1:8080/cb").unwrap()];
        validate_client_metadata(&m).unwrap();

        // The web loopback exception is plain-http 127.0.0.1 only.
        m.redirect_uris = vec![Url::parse("http://[::1]:8080/cb").unwrap()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InvalidRedirectUri { .. })
        ));

        m.redirect_uris = vec![Url::parse("foo://127.0.0.1/cb").unwrap()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InvalidRedirectUri { .. })
        ));

        m.redirect_uris = vec![Url::parse("https://127.0.0.1/cb").unwrap()];
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::InvalidRedirectUri { .. })
        ));
    }

    #[test]
    fn confidential_client_requires_keys() {
        let mut m = valid_client_metadata();
        m.token_endpoint_auth_method = Some(AuthMethod::PrivateKeyJwt);
        m.token_endpoint_auth_signing_alg = Some("ES256".into());
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::JwksChoice)
        ));

        m.jwks_uri = Some(Url::parse("https://app.test/jwks.json").unwrap());
        validate_client_metadata(&m).unwrap();

        m.token_endpoint_auth_signing_alg = Some("RS256".into());
        assert!(matches!(
            validate_client_metadata(&m),
            Err(ClientMetadataError::AuthSigningAlg)
        ));
    }

    #[tokio::test]
    async fn fetch_rejects_client_id_mismatch() {
        let mut doc = serde_json::to_value(valid_client_metadata()).unwrap();
        doc["client_id"] = "https://impostor.test/meta.json".into();
        let http = MockHttp::queue(vec![(200, doc.to_string())]);
        let url = Url::parse("https://app.test/oauth/client-metadata.json").unwrap();
        let err = fetch_client_metadata(&http, &url).await.unwrap_err();
        assert!(matches!(err, ClientMetadataError::ClientIdMismatch { .. }));
    }

    #[tokio::test]
    async fn fetch_blocks_private_addresses_before_any_request() {
        let guarded = twill_common::GuardedClient::new().unwrap();
        let url = Url::parse("https://192.168.0.1/meta.json").unwrap();
        let err = fetch_client_metadata(&guarded, &url).await.unwrap_err();
        assert!(matches!(
            err,
            ClientMetadataError::Http(HttpError::Ssrf(_))
        ));
    }

    #[test]
    fn accepts_valid_server_metadata() {
        validate_authorization_server(&valid_server_metadata()).unwrap();
    }

    #[test]
    fn server_metadata_requirements() {
        let mut m = valid_server_metadata();
        m.pushed_authorization_request_endpoint = None;
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::BadEndpoint(_))
        ));

        let mut m = valid_server_metadata();
        m.token_endpoint_auth_signing_alg_values_supported.push("none".into());
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::NoneSigningAlg)
        ));

        let mut m = valid_server_metadata();
        m.require_pushed_authorization_requests = Some(false);
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::FlagNotTrue(
                "require_pushed_authorization_requests"
            ))
        ));

        let mut m = valid_server_metadata();
        m.authorization_response_iss_parameter_supported = None;
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::FlagNotTrue(_))
        ));

        let mut m = valid_server_metadata();
        m.code_challenge_methods_supported = vec!["plain".into()];
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::MissingCapability { .. })
        ));

        let mut m = valid_server_metadata();
        m.scopes_supported = vec![];
        assert!(matches!(
            validate_authorization_server(&m),
            Err(ServerMetadataError::MissingCapability {
                field: "scopes_supported",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn resource_server_must_name_exactly_one_issuer() {
        let http = MockHttp::queue(vec![(
            200,
            r#"{"authorization_servers": ["https://a.test", "https://b.test"]}"#.into(),
        )]);
        let pds = Url::parse("https://pds.test").unwrap();
        let err = fetch_resource_server(&http, &pds).await.unwrap_err();
        assert!(matches!(
            err,
            ServerMetadataError::AuthorizationServerCount(2)
        ));

        let http = MockHttp::queue(vec![(
            200,
            r#"{"authorization_servers": ["https://auth.test/path"]}"#.into(),
        )]);
        let err = fetch_resource_server(&http, &pds).await.unwrap_err();
        assert!(matches!(
            err,
            ServerMetadataError::InvalidAuthorizationServerOrigin(_)
        ));
    }

    #[tokio::test]
    async fn authorization_server_issuer_must_match_request() {
        let http = MockHttp::queue(vec![(
            200,
            server_metadata_json("https://other.test").to_string(),
        )]);
        let issuer = Url::parse("https://auth.test").unwrap();
        let err = fetch_authorization_server(&http, &issuer).await.unwrap_err();
        assert!(matches!(err, ServerMetadataError::IssuerMismatch { .. }));
    }

    #[tokio::test]
    async fn issuer_binding_round_trip() {
        let pds = Url::parse("https://pds.test").unwrap();
        let issuer = Url::parse("https://auth.test").unwrap();

        let http = MockHttp::queue(vec![(
            200,
            r#"{"authorization_servers": ["https://auth.test"]}"#.into(),
        )]);
        verify_issuer_binding(&http, &pds, &issuer).await.unwrap();

        let http = MockHttp::queue(vec![(
            200,
            r#"{"authorization_servers": ["https://rogue.test"]}"#.into(),
        )]);
        assert!(matches!(
            verify_issuer_binding(&http, &pds, &issuer).await.unwrap_err(),
            ServerMetadataError::IssuerBinding { .. }
        ));
    }
}
