//! Minimal HTTP client abstraction plus the hardened default transport.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
/// Default cap on response body size (10 MiB).
pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Request refused before any bytes left the process.
#[derive(Debug, Error, Diagnostic)]
#[error("request to {host} blocked: {reason}")]
#[diagnostic(
    code(twill_common::ssrf),
    help("private, loopback, and link-local destinations are never fetched")
)]
pub struct SsrfError {
    pub host: String,
    pub reason: &'static str,
}

impl SsrfError {
    fn new(host: impl Into<String>, reason: &'static str) -> Self {
        Self {
            host: host.into(),
            reason,
        }
    }
}

/// Transport-level errors surfaced by [`HttpClient`] implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum HttpError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Ssrf(#[from] SsrfError),

    #[error("refusing non-https url: {0}")]
    #[diagnostic(
        code(twill_common::insecure_scheme),
        help("only https is allowed, except for plain-http localhost")
    )]
    InsecureScheme(String),

    #[error("response body exceeds {limit} bytes")]
    #[diagnostic(code(twill_common::body_too_large))]
    BodyTooLarge { limit: usize },

    #[error("invalid request: {0}")]
    #[diagnostic(code(twill_common::invalid_request))]
    InvalidRequest(String),

    #[error("transport error")]
    #[diagnostic(code(twill_common::transport))]
    Transport(#[source] BoxError),
}

/// HTTP client trait for sending raw HTTP requests.
///
/// The request/response types are plain `http` bodies; implementations own
/// connection pooling, timeouts, and redirect behavior.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpError> {
        self.as_ref().send_http(request).await
    }
}

/// Reqwest-backed [`HttpClient`] with transport hardening:
///
/// - HTTPS required everywhere except the literal hostname `localhost`
/// - destinations resolving to private, loopback, link-local, or ULA
///   addresses are refused (redirect hops included)
/// - at most five redirects are followed
/// - response bodies are capped at 10 MiB
/// - every request carries a 10 s timeout
#[derive(Clone)]
pub struct GuardedClient {
    inner: reqwest::Client,
    max_body: usize,
}

impl GuardedClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_limits(DEFAULT_TIMEOUT, DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_BODY)
    }

    pub fn with_limits(
        timeout: Duration,
        max_redirects: usize,
        max_body: usize,
    ) -> Result<Self, HttpError> {
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            // The policy callback is synchronous, so only literal hosts can
            // be rejected here; resolved addresses are checked per request.
            match check_destination(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e.to_string()),
            }
        });
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(policy)
            .build()
            .map_err(|e| HttpError::Transport(Box::new(e)))?;
        Ok(Self { inner, max_body })
    }

    /// Validate the destination without sending anything, then dispatch.
    async fn guard(&self, url: &Url) -> Result<(), HttpError> {
        check_destination(url)?;
        let Some(host) = url.host_str() else {
            return Err(HttpError::InvalidRequest(format!("url without host: {url}")));
        };
        if host.eq_ignore_ascii_case("localhost") || host.parse::<IpAddr>().is_ok() {
            // Literal hosts were fully checked by `check_destination`.
            return Ok(());
        }
        // Resolve the hostname ourselves so that names pointing into private
        // ranges are refused before the request goes out.
        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| HttpError::Transport(Box::new(e)))?
            .collect();
        if addrs.is_empty() {
            return Err(HttpError::Transport(
                format!("no addresses for {host}").into(),
            ));
        }
        for addr in addrs {
            if let Some(reason) = blocked_reason(&addr.ip()) {
                return Err(SsrfError::new(host, reason).into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for GuardedClient {
    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpError> {
        let (parts, body) = request.into_parts();
        let url = Url::parse(&parts.uri.to_string())
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
        self.guard(&url).await?;

        let mut req = self.inner.request(parts.method, url).body(body);
        for (name, value) in parts.headers.iter() {
            req = req.header(name, value);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| HttpError::Transport(Box::new(e)))?;

        let mut builder = http::Response::builder().status(resp.status());
        for (name, value) in resp.headers().iter() {
            builder = builder.header(name, value);
        }

        let mut resp = resp;
        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| HttpError::Transport(Box::new(e)))?
        {
            if body.len() + chunk.len() > self.max_body {
                return Err(HttpError::BodyTooLarge {
                    limit: self.max_body,
                });
            }
            body.extend_from_slice(&chunk);
        }
        builder
            .body(body)
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))
    }
}

/// Scheme and literal-host policy, applied before dispatch and on every
/// redirect hop.
fn check_destination(url: &Url) -> Result<(), HttpError> {
    let host = url
        .host_str()
        .ok_or_else(|| HttpError::InvalidRequest(format!("url without host: {url}")))?;
    let is_localhost = host.eq_ignore_ascii_case("localhost");
    match url.scheme() {
        "https" => {}
        "http" if is_localhost => {}
        _ => return Err(HttpError::InsecureScheme(url.to_string())),
    }
    if is_localhost {
        return Ok(());
    }
    if let Ok(ip) = trim_brackets(host).parse::<IpAddr>() {
        if let Some(reason) = blocked_reason(&ip) {
            return Err(SsrfError::new(host, reason).into());
        }
    }
    Ok(())
}

fn trim_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Returns why an address is refused, or `None` when it is publicly
/// routable. Covers 0/8, 10/8, 127/8, 169.254/16, 172.16/12, 192.168/16,
/// fc00::/7, fe80::/10, the unspecified addresses, and `::1`.
fn blocked_reason(ip: &IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_reason_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return blocked_reason_v4(&mapped);
            }
            blocked_reason_v6(v6)
        }
    }
}

fn blocked_reason_v4(ip: &Ipv4Addr) -> Option<&'static str> {
    let o = ip.octets();
    match o {
        [0, ..] => Some("reserved range 0.0.0.0/8"),
        [10, ..] => Some("private range 10.0.0.0/8"),
        [127, ..] => Some("loopback range 127.0.0.0/8"),
        [169, 254, ..] => Some("link-local range 169.254.0.0/16"),
        [172, b, ..] if (16..=31).contains(&b) => Some("private range 172.16.0.0/12"),
        [192, 168, ..] => Some("private range 192.168.0.0/16"),
        _ => None,
    }
}

fn blocked_reason_v6(ip: &Ipv6Addr) -> Option<&'static str> {
    if ip.is_loopback() || ip.is_unspecified() {
        return Some("loopback address");
    }
    let seg = ip.segments();
    if seg[0] & 0xfe00 == 0xfc00 {
        return Some("unique-local range fc00::/7");
    }
    if seg[0] & 0xffc0 == 0xfe80 {
        return Some("link-local range fe80::/10");
    }
    None
}
