//! AT Protocol OAuth 2.0 client core.
//!
//! Drives the full authorization code flow against AT Protocol
//! authorization servers: identity resolution, PKCE, Pushed
//! Authorization Requests, DPoP-bound tokens with per-server nonce
//! tracking, bounded-backoff refresh, and encrypted, pluggable session
//! storage that is safe under concurrent use.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use twill_oauth::{
//!     client::OAuthClient,
//!     config::OAuthConfig,
//!     metadata::fetch_client_metadata,
//!     storage::memory::MemoryStorage,
//!     types::{AuthorizeOptions, CallbackParams},
//! };
//!
//! let http = twill_common::GuardedClient::new()?;
//! let metadata_url = url::Url::parse("https://app.example.com/oauth/client-metadata.json")?;
//! let config = OAuthConfig::new(fetch_client_metadata(&http, &metadata_url).await?)?;
//! let client = OAuthClient::connect(config, http, Arc::new(MemoryStorage::new())).await?;
//!
//! let outcome = client
//!     .authorize(AuthorizeOptions {
//!         handle: Some("alice.example.com".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! // …redirect the user to `outcome.url`, then in the callback handler:
//! let summary = client
//!     .handle_callback(CallbackParams {
//!         code: "…".into(),
//!         state: "…".into(),
//!         iss: "https://auth.example.com".into(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod client;
pub mod config;
pub mod crypto;
pub mod dpop;
pub mod envelope;
pub mod error;
pub mod jose;
pub mod loopback;
pub mod metadata;
pub mod namespace;
pub mod origin;
pub mod pkce;
pub mod refresh;
pub mod registry;
pub mod request;
pub mod session;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testutil;

pub use client::{AuthorizeOutcome, OAuthClient, TokenSummary};
pub use config::OAuthConfig;
pub use error::{OAuthError, Result};
pub use session::Session;
pub use types::TokenSet;

pub use twill_common::{GuardedClient, HttpClient};
pub use twill_identity::{Did, Handle};

pub use twill_common as common;
pub use twill_identity as identity;
