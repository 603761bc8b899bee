//! Crate-wide error type for the client facade.
//!
//! Each subsystem keeps its own error family (stable machine codes live
//! on those); this enum is the umbrella the facade surfaces, plus the
//! few failures that only exist at flow level (state lookup, issuer
//! mismatch, authorization gating).

use miette::Diagnostic;
use thiserror::Error;

use crate::assertion::KeysetError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::dpop::DpopError;
use crate::envelope::EnvelopeError;
use crate::metadata::{ClientMetadataError, ServerMetadataError};
use crate::pkce::PkceError;
use crate::refresh::RefreshError;
use crate::registry::RegistryError;
use crate::request::{ParError, TokenError};
use crate::session::SessionError;
use crate::storage::{LockError, StorageError};

#[derive(Debug, Error, Diagnostic)]
pub enum OAuthError {
    #[error("invalid request: {0}")]
    #[diagnostic(code(twill_oauth::invalid_request))]
    InvalidRequest(String),

    #[error("no session matches the supplied state token")]
    #[diagnostic(
        code(twill_oauth::invalid_state),
        help("the flow may have expired or the callback may be forged; start a new authorize")
    )]
    InvalidState,

    #[error("callback issuer {got} does not match the session's issuer {expected}")]
    #[diagnostic(code(twill_oauth::issuer_mismatch))]
    IssuerMismatch { expected: String, got: String },

    #[error("unknown session {0}")]
    #[diagnostic(code(twill_oauth::session_not_found))]
    SessionNotFound(String),

    #[error("session {0} is not authorized")]
    #[diagnostic(
        code(twill_oauth::not_authorized),
        help("complete the callback or refresh the tokens first")
    )]
    NotAuthorized(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ClientMetadata(#[from] ClientMetadataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ServerMetadata(#[from] ServerMetadataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] twill_identity::IdentityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Http(#[from] twill_common::HttpError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pkce(#[from] PkceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] DpopError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Keyset(#[from] KeysetError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Par(#[from] ParError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("form serialization failed")]
    #[diagnostic(code(twill_oauth::form))]
    Form(#[from] serde_html_form::ser::Error),
}

pub type Result<T> = std::result::Result<T, OAuthError>;
