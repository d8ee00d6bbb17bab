//! Entities and wire DTOs. Principal/RefreshRecord mirror the relational
//! tables in `migrations/0001_init.sql`; the rest are request/response
//! shapes for the endpoints in `handlers::auth`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// The principal as the core reads it. Creation/update of profile fields is
/// an external collaborator's job; this service only ever issues an UPDATE
/// against `last_login_at`, `password_hash` (rehash on login), or reads.
#[derive(Debug, Clone, FromRow)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Invariant: a principal with a non-null soft-delete timestamp is never
    /// authenticated, active flag notwithstanding.
    pub fn is_authenticatable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

/// The `{roles, permissions}` read projection keyed by principal id (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileProjection {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Persisted refresh record row (never the raw token, only its hash).
#[derive(Debug, Clone, FromRow)]
pub struct RefreshRecord {
    pub id: i64,
    pub principal_id: i64,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshRecord {
    pub fn is_usable(&self) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now()
    }
}

/// `GET /api/v1/auth/sessions` response row — never the hash or raw token.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRecordSummary {
    pub id: i64,
    pub device_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshRecord> for RefreshRecordSummary {
    fn from(r: RefreshRecord) -> Self {
        Self { id: r.id, device_info: r.device_info, created_at: r.created_at, expires_at: r.expires_at }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
    pub device_info: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl AuthResponse {
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self { access_token, refresh_token, token_type: "bearer", expires_in }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub principal_id: i64,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct IntrospectResponse {
    pub active: bool,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub roles: Option<Vec<String>>,
    pub permissions: Option<Vec<String>>,
    pub exp: Option<i64>,
}

impl IntrospectResponse {
    pub fn inactive() -> Self {
        Self { active: false, user_id: None, email: None, roles: None, permissions: None, exp: None }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: HealthServices,
}

#[derive(Debug, Serialize)]
pub struct HealthServices {
    pub database: &'static str,
    pub volatile_store: &'static str,
    pub cache: &'static str,
}
