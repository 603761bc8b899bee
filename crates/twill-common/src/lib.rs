//! Shared HTTP transport contract for the twill workspace.
//!
//! Discovery, identity resolution, and the OAuth flows all talk to the
//! network through the [`http_client::HttpClient`] trait; the shipped
//! [`http_client::GuardedClient`] adds the transport hardening the
//! AT Protocol client profile requires (HTTPS enforcement, SSRF
//! blocklist, redirect and body caps).

pub mod http_client;

pub use http_client::{GuardedClient, HttpClient, HttpError, SsrfError};
