//! Development client metadata for `http://localhost` clients.
//!
//! AT Protocol authorization servers accept a special loopback client
//! whose `client_id` is `http://localhost` with the redirect URIs and
//! scope folded into the query string, so local tools can run the flow
//! without hosting a metadata document.

use serde::Serialize;
use url::{Host, Url};

use crate::metadata::SCOPE_ATPROTO;
use crate::types::{ApplicationType, ClientMetadata};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum LoopbackError {
    #[error("invalid redirect_uri: {0}")]
    #[diagnostic(code(twill_oauth::loopback::parse))]
    Invalid(#[from] url::ParseError),

    #[error("loopback redirect_uri must use `http:`: {0}")]
    #[diagnostic(code(twill_oauth::loopback::scheme))]
    NotHttpScheme(Url),

    #[error("loopback redirect_uri must not use the `localhost` hostname: {0}")]
    #[diagnostic(
        code(twill_oauth::loopback::localhost),
        help("use 127.0.0.1 or [::1]; `localhost` resolution is OS-dependent")
    )]
    Localhost(Url),

    #[error("loopback redirect_uri must use a loopback address: {0}")]
    #[diagnostic(code(twill_oauth::loopback::host))]
    NotLoopbackHost(Url),

    #[error("loopback client_id query failed to serialize")]
    #[diagnostic(code(twill_oauth::loopback::query))]
    Query(#[from] serde_html_form::ser::Error),
}

/// Build metadata for a loopback development client.
///
/// Redirect URIs default to `http://127.0.0.1/` and `http://[::1]/`;
/// the scope defaults to `atproto`. Non-default values are encoded into
/// the `client_id` query string, which is how the authorization server
/// learns them for a client it cannot fetch metadata for.
pub fn loopback_client_metadata(
    redirect_uris: Option<Vec<Url>>,
    scope: Option<&str>,
) -> Result<ClientMetadata, LoopbackError> {
    if let Some(redirect_uris) = &redirect_uris {
        for uri in redirect_uris {
            validate_loopback_redirect(uri)?;
        }
    }

    #[derive(Serialize)]
    struct Parameters<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        redirect_uri: Option<&'a [Url]>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scope: Option<&'a str>,
    }
    let query = serde_html_form::to_string(Parameters {
        redirect_uri: redirect_uris.as_deref(),
        scope,
    })?;
    let mut client_id = String::from("http://localhost");
    if !query.is_empty() {
        client_id.push('?');
        client_id.push_str(&query);
    }

    let redirect_uris = redirect_uris.unwrap_or_else(|| {
        vec![
            Url::parse("http://127.0.0.1/").expect("valid url"),
            Url::parse("http://[::1]/").expect("valid url"),
        ]
    });
    Ok(ClientMetadata {
        client_id: Url::parse(&client_id)?,
        application_type: ApplicationType::Native,
        grant_types: vec!["authorization_code".into(), "refresh_token".into()],
        response_types: vec!["code".into()],
        redirect_uris,
        scope: scope.unwrap_or(SCOPE_ATPROTO).to_owned(),
        dpop_bound_access_tokens: true,
        client_name: None,
        client_uri: None,
        logo_uri: None,
        tos_uri: None,
        policy_uri: None,
        token_endpoint_auth_method: Some(crate::types::AuthMethod::None),
        token_endpoint_auth_signing_alg: None,
        jwks: None,
        jwks_uri: None,
    })
}

fn validate_loopback_redirect(uri: &Url) -> Result<(), LoopbackError> {
    if uri.scheme() != "http" {
        return Err(LoopbackError::NotHttpScheme(uri.clone()));
    }
    match uri.host() {
        Some(host) if host == Host::parse("localhost").expect("valid host") => {
            Err(LoopbackError::Localhost(uri.clone()))
        }
        Some(host)
            if host == Host::parse("127.0.0.1").expect("valid host")
                || host == Host::parse("[::1]").expect("valid host") =>
        {
            Ok(())
        }
        _ => Err(LoopbackError::NotLoopbackHost(uri.clone())),
    }
}
