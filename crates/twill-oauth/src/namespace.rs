//! Storage key namespace.
//!
//! Everything this crate persists lives under `atproto:`:
//!
//! - `atproto:session:<session_id>` — encrypted session envelope
//! - `atproto:state:<state_token>` — plain session id
//! - `atproto:nonce:<server_origin>` — DPoP nonce envelope (TTL)
//! - `atproto:lock:<namespace>:<id>` — `with_lock` guards
//! - `atproto:dpop:<client_id>` — encrypted client DPoP keypair

pub const NAMESPACE: &str = "atproto";

pub fn session_key(session_id: &str) -> String {
    format!("{NAMESPACE}:session:{session_id}")
}

pub fn state_key(state_token: &str) -> String {
    format!("{NAMESPACE}:state:{state_token}")
}

pub fn nonce_key(server_origin: &str) -> String {
    format!("{NAMESPACE}:nonce:{server_origin}")
}

pub fn lock_key(namespace: &str, id: &str) -> String {
    format!("{NAMESPACE}:lock:{namespace}:{id}")
}

pub fn dpop_key(client_id: &str) -> String {
    format!("{NAMESPACE}:dpop:{client_id}")
}
