//! Stable error vocabulary for the credential/admission core.
//!
//! One enum, one canonical envelope. Every coordinator returns a variant from
//! here instead of a free-form string so that the HTTP boundary, the audit
//! log, and downstream consumers all agree on the same finite set of codes.
//! The codes themselves are part of the wire contract — renaming one is a
//! breaking change for every service that reads `error.code`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Canonical error envelope: `{success:false, data:null, error:{code, message, details}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub data: Option<()>,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
}

/// Short-form body used only for rate-limit rejections, kept for backward
/// compatibility with clients that predate the canonical envelope.
#[derive(Debug, Serialize)]
pub struct RateLimitBody {
    pub error_code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No such principal, wrong password, locked, or inactive. Deliberately a
    /// single variant: §4.6 requires these four conditions to be
    /// indistinguishable to the caller.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential")]
    InvalidToken,

    #[error("missing authorization header")]
    MissingAuthorization,

    #[error("invalid or expired refresh credential")]
    InvalidRefresh,

    #[error("credential has been revoked")]
    TokenRevoked,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("an account with that email already exists")]
    DuplicateEmail,

    #[error("resource not found")]
    NotFound,

    #[error("password does not meet strength requirements: {0}")]
    WeakPassword(String),

    #[error("current password does not match")]
    CurrentPasswordMismatch,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64, limit: u32, window_secs: u64 },

    #[error("missing CSRF token")]
    MissingCsrf,

    #[error("CSRF token mismatch")]
    CsrfMismatch,

    #[error("system overloaded")]
    SystemOverload,

    #[error("request queue is full")]
    QueueFull,

    #[error("timed out waiting for a free worker")]
    QueueTimeout,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Audit-only outcomes. `Locked` and `Inactive` never leave the process as an
/// HTTP response (both are folded into `AuthError::InvalidCredentials` at the
/// boundary per §4.6); they exist so the structured-log sink can still record
/// the true reason a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    NoSuchPrincipal,
    WrongPassword,
    Locked,
    Inactive,
    RevokeAll,
    RefreshRotated,
    RefreshReplay,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOutcome::Success => "success",
            AuditOutcome::NoSuchPrincipal => "no_such_principal",
            AuditOutcome::WrongPassword => "wrong_password",
            AuditOutcome::Locked => "locked",
            AuditOutcome::Inactive => "inactive",
            AuditOutcome::RevokeAll => "revoke_all",
            AuditOutcome::RefreshRotated => "refresh_rotated",
            AuditOutcome::RefreshReplay => "refresh_replay",
        };
        f.write_str(s)
    }
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "AUTH_001",
            AuthError::Expired => "AUTH_002",
            AuthError::InvalidToken => "AUTH_003",
            AuthError::MissingAuthorization => "AUTH_007",
            AuthError::InvalidRefresh => "AUTH_006",
            AuthError::TokenRevoked => "AUTH_008",
            AuthError::InsufficientPermissions => "AUTHZ_001",
            AuthError::DuplicateEmail => "USER_001",
            AuthError::NotFound => "USER_002",
            AuthError::WeakPassword(_) => "USER_003",
            AuthError::CurrentPasswordMismatch => "USER_004",
            AuthError::RateLimited { .. } => "RATE_LIMIT_001",
            AuthError::MissingCsrf => "CSRF_001",
            AuthError::CsrfMismatch => "CSRF_002",
            AuthError::SystemOverload => "SYSTEM_OVERLOAD",
            AuthError::QueueFull => "QUEUE_FULL",
            AuthError::QueueTimeout => "QUEUE_TIMEOUT",
            AuthError::Database(_) | AuthError::Internal(_) => "SYSTEM_001",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::Expired
            | AuthError::InvalidToken
            | AuthError::MissingAuthorization
            | AuthError::InvalidRefresh
            | AuthError::TokenRevoked => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::DuplicateEmail => StatusCode::CONFLICT,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::WeakPassword(_) | AuthError::CurrentPasswordMismatch => {
                StatusCode::BAD_REQUEST
            }
            AuthError::MissingCsrf | AuthError::CsrfMismatch => StatusCode::FORBIDDEN,
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::SystemOverload | AuthError::QueueFull | AuthError::QueueTimeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthError::Database(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AuthError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            AuthError::SystemOverload => Some(5),
            AuthError::QueueFull => Some(1),
            AuthError::QueueTimeout => Some(2),
            _ => None,
        }
    }

    /// `X-Queue-Status` (§6): `rejected`/`full`/`timeout` on the three
    /// backpressure denials; the fourth value, `processed`, is set by the
    /// backpressure middleware itself on the success path, not here.
    fn queue_status(&self) -> Option<&'static str> {
        match self {
            AuthError::SystemOverload => Some("rejected"),
            AuthError::QueueFull => Some("full"),
            AuthError::QueueTimeout => Some("timeout"),
            _ => None,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            data: None,
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        AuthError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(secs) = self.retry_after_secs() {
            builder.insert_header(("Retry-After", secs.to_string()));
        }
        if let AuthError::RateLimited { limit, window_secs, .. } = self {
            // Rate-limit rejections use the shorter legacy body, kept
            // consistent across one deployment per §6.
            builder.insert_header(("X-RateLimit-Limit", limit.to_string()));
            builder.insert_header(("X-RateLimit-Window", window_secs.to_string()));
            return builder.json(RateLimitBody {
                error_code: self.code(),
                message: self.to_string(),
            });
        }
        if let Some(queue_status) = self.queue_status() {
            builder.insert_header(("X-Queue-Status", queue_status));
        }
        builder.json(self.envelope())
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AuthError::NotFound,
            other => AuthError::Database(other.to_string()),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_defense_codes_share_status_and_message() {
        let e1 = AuthError::InvalidCredentials;
        assert_eq!(e1.code(), "AUTH_001");
        assert_eq!(e1.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let e = AuthError::RateLimited { retry_after_secs: 60, limit: 5, window_secs: 60 };
        assert_eq!(e.retry_after_secs(), Some(60));
        assert_eq!(e.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn backpressure_variants_map_to_503_with_distinct_retry_after() {
        assert_eq!(AuthError::SystemOverload.retry_after_secs(), Some(5));
        assert_eq!(AuthError::QueueFull.retry_after_secs(), Some(1));
        assert_eq!(AuthError::QueueTimeout.retry_after_secs(), Some(2));
    }

    #[test]
    fn backpressure_variants_carry_the_matching_queue_status() {
        assert_eq!(AuthError::SystemOverload.queue_status(), Some("rejected"));
        assert_eq!(AuthError::QueueFull.queue_status(), Some("full"));
        assert_eq!(AuthError::QueueTimeout.queue_status(), Some("timeout"));
        assert_eq!(AuthError::InvalidCredentials.queue_status(), None);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AuthError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AuthError::NotFound));
    }
}
