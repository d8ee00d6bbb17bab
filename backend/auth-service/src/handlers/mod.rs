//! HTTP request handlers (§6 endpoint table).
pub mod auth;

pub use auth::{health, introspect, jwks, list_sessions, login, logout, refresh, revoke_all_sessions, verify};
