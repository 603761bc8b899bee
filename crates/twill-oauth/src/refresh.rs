//! Token refresh with a bounded exponential-backoff retry loop.
//!
//! The refresh grant runs under the caller's session lock. Each attempt
//! classifies the outcome: fatal failures (`invalid_grant`, HTTP 401,
//! other 4xx) abort immediately, retryable ones back off with
//! `min(1s · 2^(n−1), 8s)` plus uniform jitter of up to half the delay,
//! honoring `Retry-After` on 429. After three attempts the loop gives up
//! with a non-retryable [`RefreshError`].

use std::time::Duration;

use http::StatusCode;
use rand::Rng;
use rand::rngs::ThreadRng;

use twill_common::HttpClient;

use crate::dpop::DpopClient;
use crate::request::{RequestContext, ScopeRule, refresh_grant, validate_token_response};
use crate::types::{OAuthErrorBody, TokenResponse, TokenSet};

pub const MAX_RETRIES: u32 = 3;
pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(8);

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Refresh failure with an explicit retry verdict. `retry_possible:
/// false` means the refresh token is spent, revoked, or the retry budget
/// is exhausted; the caller must not try again.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("{message}")]
#[diagnostic(code(twill_oauth::refresh))]
pub struct RefreshError {
    message: String,
    retry_possible: bool,
    #[source]
    source: Option<BoxError>,
}

impl RefreshError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_possible: true,
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_possible: false,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn retry_possible(&self) -> bool {
        self.retry_possible
    }
}

enum Attempt {
    Success(TokenSet),
    Fatal(RefreshError),
    /// Retry after an explicit wait (from `Retry-After`) or the computed
    /// backoff when `None`.
    Retry {
        reason: String,
        wait: Option<Duration>,
    },
}

/// Exchange the session's refresh token for a fresh token set.
#[tracing::instrument(level = "debug", skip_all, fields(sub = %current.sub))]
pub async fn refresh_tokens<H: HttpClient>(
    http: &H,
    dpop: &DpopClient,
    ctx: &RequestContext<'_>,
    current: &TokenSet,
) -> Result<TokenSet, RefreshError> {
    let Some(refresh_token) = current.refresh_token.as_deref().filter(|t| !t.is_empty()) else {
        return Err(RefreshError::fatal("session has no refresh token"));
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match refresh_grant(http, dpop, ctx, refresh_token, &current.scope).await {
            Ok(response) => classify(response, current),
            // Transport and proof hiccups are worth another try; the
            // grant itself was not consumed.
            Err(e) => Attempt::Retry {
                reason: e.to_string(),
                wait: None,
            },
        };
        match outcome {
            Attempt::Success(tokens) => return Ok(tokens),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry { reason, wait } => {
                if attempt >= MAX_RETRIES {
                    return Err(RefreshError::fatal(format!(
                        "token refresh failed after {MAX_RETRIES} attempts: {reason}"
                    )));
                }
                let delay = wait.unwrap_or_else(|| backoff_delay(attempt));
                tracing::debug!(attempt, ?delay, reason, "refresh attempt failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn classify(response: http::Response<Vec<u8>>, current: &TokenSet) -> Attempt {
    let status = response.status();
    match status {
        StatusCode::OK => {
            let parsed: TokenResponse = match serde_json::from_slice(response.body()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Attempt::Fatal(
                        RefreshError::fatal("token refresh response is malformed")
                            .with_source(e),
                    );
                }
            };
            match validate_token_response(
                parsed,
                Some(&current.sub),
                ScopeRule::CoversOriginal(&current.scope),
            ) {
                Ok(tokens) => Attempt::Success(tokens),
                Err(e) => Attempt::Fatal(
                    RefreshError::fatal(format!("token refresh response rejected: {e}"))
                        .with_source(e),
                ),
            }
        }
        StatusCode::BAD_REQUEST => {
            let body: OAuthErrorBody =
                serde_json::from_slice(response.body()).unwrap_or_default();
            match body.error.as_deref() {
                // The nonce from the challenge was already absorbed by
                // the DPoP layer; next attempt carries it.
                Some("use_dpop_nonce") => Attempt::Retry {
                    reason: "authorization server demanded a fresh DPoP nonce".into(),
                    wait: None,
                },
                Some("invalid_grant") => Attempt::Fatal(RefreshError::fatal(
                    "refresh token is no longer valid (invalid_grant)",
                )),
                other => Attempt::Fatal(RefreshError::fatal(format!(
                    "token refresh rejected: {}",
                    other.unwrap_or("bad request")
                ))),
            }
        }
        StatusCode::UNAUTHORIZED => {
            Attempt::Fatal(RefreshError::fatal("refresh token revoked (HTTP 401)"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let wait = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Attempt::Retry {
                reason: "rate limited (HTTP 429)".into(),
                wait,
            }
        }
        status => Attempt::Retry {
            reason: format!("HTTP {status}"),
            wait: None,
        },
    }
}

/// `min(BASE · 2^(attempt−1), MAX)` plus `U(0, delay/2)` jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY
        .saturating_mul(1 << (attempt - 1).min(16))
        .min(MAX_DELAY);
    let jitter = ThreadRng::default().gen_range(0.0..0.5) * base.as_secs_f64();
    base + Duration::from_secs_f64(jitter)
}
