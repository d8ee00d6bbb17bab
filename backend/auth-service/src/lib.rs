//! Credential issuance, rotation, revocation, and admission control core.

pub mod config;
pub mod db;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod security;
pub mod services;
pub mod telemetry;

pub use error_types::{AuthError, AuthResult as Result};

pub use models::{
    AuthResponse, HealthResponse, IntrospectRequest, IntrospectResponse, LoginRequest,
    LogoutRequest, Principal, ProfileProjection, RefreshRecord, RefreshRecordSummary,
    RefreshRequest, VerifyRequest, VerifyResponse,
};

use registry::CredentialRegistry;
use services::{login::LoginCoordinator, logout::LogoutCoordinator, profile_cache::ProfileCache, refresh::RefreshCoordinator};
use std::sync::Arc;

/// Everything a handler needs to run one request. Constructed once at
/// startup in `main` and shared across workers via `actix_web::web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub store: Arc<dyn redis_utils::VolatileStore>,
    pub codec: Arc<jwt_security::CredentialCodec>,
    pub registry: CredentialRegistry,
    pub profiles: ProfileCache,
    pub login: LoginCoordinator,
    pub refresh: RefreshCoordinator,
    pub logout: LogoutCoordinator,
    /// Access-credential lifetime, needed by `revoke_all` to size the
    /// blacklist TTL for every active-set member it pipelines.
    pub access_ttl: std::time::Duration,
}
