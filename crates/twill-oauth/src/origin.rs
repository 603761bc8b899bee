//! Simple origin URLs and server-origin canonicalization.
//!
//! An origin URL names a server identity and nothing else: `https`,
//! host, optionally a non-default port. The same canonicalization backs
//! the per-server DPoP nonce keys.

use smol_str::SmolStr;
use url::Url;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum OriginError {
    #[error("not a valid URL: {0}")]
    #[diagnostic(code(twill_oauth::origin::parse))]
    Parse(#[from] url::ParseError),

    #[error("origin URL must use https: {0}")]
    #[diagnostic(code(twill_oauth::origin::scheme))]
    NotHttps(SmolStr),

    #[error("origin URL must not have a path: {0}")]
    #[diagnostic(code(twill_oauth::origin::path))]
    HasPath(SmolStr),

    #[error("origin URL must not have a query: {0}")]
    #[diagnostic(code(twill_oauth::origin::query))]
    HasQuery(SmolStr),

    #[error("origin URL must not have a fragment: {0}")]
    #[diagnostic(code(twill_oauth::origin::fragment))]
    HasFragment(SmolStr),

    #[error("origin URL must not carry userinfo: {0}")]
    #[diagnostic(code(twill_oauth::origin::userinfo))]
    HasUserinfo(SmolStr),

    #[error("origin URL must not spell out the default port: {0}")]
    #[diagnostic(code(twill_oauth::origin::default_port))]
    DefaultPort(SmolStr),

    #[error("non-https server origin only allowed for localhost: {0}")]
    #[diagnostic(code(twill_oauth::origin::insecure))]
    InsecureOrigin(SmolStr),
}

/// Validate a "simple origin URL": `https`, empty or `/` path, no query,
/// no fragment, no userinfo, and no explicit `:443`.
///
/// Takes the raw string because the `url` crate normalizes `:443` away
/// during parsing, which would make the explicit-default-port case
/// undetectable afterwards.
pub fn validate_origin_url(input: &str) -> Result<Url, OriginError> {
    let url = Url::parse(input)?;
    if url.scheme() != "https" {
        return Err(OriginError::NotHttps(input.into()));
    }
    if !matches!(url.path(), "" | "/") {
        return Err(OriginError::HasPath(input.into()));
    }
    if url.query().is_some() {
        return Err(OriginError::HasQuery(input.into()));
    }
    if url.fragment().is_some() {
        return Err(OriginError::HasFragment(input.into()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(OriginError::HasUserinfo(input.into()));
    }
    if authority_of(input).ends_with(":443") {
        return Err(OriginError::DefaultPort(input.into()));
    }
    Ok(url)
}

/// The authority component of the raw input (between `scheme://` and the
/// first `/`, `?`, or `#`).
fn authority_of(input: &str) -> &str {
    let rest = input
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(input);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

/// Canonical server origin for nonce bookkeeping: scheme + host + port if
/// non-default. Plain-http origins are only accepted for localhost.
pub fn server_origin(url: &Url) -> Result<String, OriginError> {
    let host = url
        .host_str()
        .ok_or_else(|| OriginError::Parse(url::ParseError::EmptyHost))?;
    if url.scheme() != "https" && !host.eq_ignore_ascii_case("localhost") {
        return Err(OriginError::InsecureOrigin(url.as_str().into()));
    }
    let port = match url.port() {
        // `Url` keeps only non-default ports.
        Some(p) => format!(":{p}"),
        None => String::new(),
    };
    Ok(format!("{}://{host}{port}", url.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_origin() {
        assert!(validate_origin_url("https://a.b").is_ok());
        assert!(validate_origin_url("https://a.b/").is_ok());
        assert!(validate_origin_url("https://a.b:8443").is_ok());
    }

    #[test]
    fn rejects_everything_else() {
        assert!(matches!(
            validate_origin_url("http://a.b"),
            Err(OriginError::NotHttps(_))
        ));
        assert!(matches!(
            validate_origin_url("https://a.b/p"),
            Err(OriginError::HasPath(_))
        ));
        assert!(matches!(
            validate_origin_url("https://a.b?x=1"),
            Err(OriginError::HasQuery(_))
        ));
        assert!(matches!(
            validate_origin_url("https://a.b#f"),
            Err(OriginError::HasFragment(_))
        ));
        assert!(matches!(
            validate_origin_url("https://u:p@a.b"),
            Err(OriginError::HasUserinfo(_))
        ));
        assert!(matches!(
            validate_origin_url("https://a.b:443"),
            Err(OriginError::DefaultPort(_))
        ));
    }

    #[test]
    fn origin_canonicalization() {
        let cases = [
            ("https://auth.test/oauth/par", "https://auth.test"),
            ("https://auth.test:443/x", "https://auth.test"),
            ("https://auth.test:8443/x", "https://auth.test:8443"),
            ("http://localhost:3000/cb", "http://localhost:3000"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                server_origin(&Url::parse(input).unwrap()).unwrap(),
                expected
            );
        }
        assert!(matches!(
            server_origin(&Url::parse("http://pds.test/x").unwrap()),
            Err(OriginError::InsecureOrigin(_))
        ));
    }
}
