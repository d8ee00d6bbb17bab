//! Wire-level handlers for the credential/admission core (§6).
//!
//! Each handler does only request/response plumbing; every decision lives in
//! a coordinator (`services::login`, `services::refresh`, `services::logout`)
//! or the registry. Authenticated endpoints take `VerifiedPrincipal` as a
//! parameter — actix-web runs the extractor before the handler body, so a
//! missing or invalid bearer credential never reaches the handler at all.

use actix_middleware::VerifiedPrincipal;
use actix_web::{web, HttpResponse};
use error_types::AuthError;
use validator::Validate;

use crate::models::{
    HealthResponse, HealthServices, IntrospectRequest, IntrospectResponse, LoginRequest,
    LogoutRequest, RefreshRequest, VerifyRequest, VerifyResponse,
};
use crate::AppState;

pub async fn login(
    state: web::Data<AppState>,
    trusted: web::Data<actix_middleware::TrustedProxies>,
    req: web::Json<LoginRequest>,
    http_req: actix_web::HttpRequest,
) -> Result<HttpResponse, AuthError> {
    req.validate().map_err(|e| AuthError::WeakPassword(e.to_string()))?;

    let client_id = actix_middleware::client_id(&http_req, &trusted);

    crate::metrics::inc_login_requests();
    let result = state.login.login(&req.email, &req.password, req.device_info.clone(), &client_id).await;
    if result.is_err() {
        crate::metrics::inc_login_failures();
    }
    let response = result?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn refresh(state: web::Data<AppState>, req: web::Json<RefreshRequest>) -> Result<HttpResponse, AuthError> {
    let response = state.refresh.refresh(&req.refresh_token).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Logout takes the caller's own access credential from the `Authorization`
/// header (it must be live to reach this handler — `VerifiedPrincipal` says
/// so) plus an optional refresh credential in the body (§4.8).
pub async fn logout(
    state: web::Data<AppState>,
    principal: VerifiedPrincipal,
    http_req: actix_web::HttpRequest,
    req: web::Json<LogoutRequest>,
) -> Result<HttpResponse, AuthError> {
    let access_token = bearer_token(&http_req)?;
    state.logout.logout(&access_token, req.refresh_token.as_deref()).await?;
    tracing::info!(principal_id = principal.principal_id, "logout completed");
    Ok(HttpResponse::NoContent().finish())
}

/// Stateless shape check: decodes and returns the claims without consulting
/// the registry. Used by callers that only need "is this well-formed and
/// unexpired", not "is this still live".
pub async fn verify(state: web::Data<AppState>, req: web::Json<VerifyRequest>) -> Result<HttpResponse, AuthError> {
    let claims = state.codec.decode(&req.token).map_err(|err| match err {
        jwt_security::CodecError::Expired => AuthError::Expired,
        jwt_security::CodecError::Malformed(_) => AuthError::InvalidToken,
    })?;
    let principal_id: i64 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
    Ok(HttpResponse::Ok().json(VerifyResponse {
        principal_id,
        email: claims.email,
        roles: claims.roles,
        permissions: claims.permissions,
    }))
}

/// Full registry check (decode + active-set + blacklist), OAuth-2
/// introspection-shaped response (§6). An invalid credential is reported as
/// `{"active": false}`, not an error — introspection never fails on a bad
/// token, only on a malformed request.
pub async fn introspect(gate: web::Data<actix_middleware::VerificationGate>, req: web::Json<IntrospectRequest>) -> Result<HttpResponse, AuthError> {
    match gate.verify(&req.token).await {
        Ok(principal) => Ok(HttpResponse::Ok().json(IntrospectResponse {
            active: true,
            user_id: Some(principal.principal_id),
            email: Some(principal.email),
            roles: Some(principal.roles),
            permissions: Some(principal.permissions),
            exp: Some(principal.exp),
        })),
        Err(_) => Ok(HttpResponse::Ok().json(IntrospectResponse::inactive())),
    }
}

pub async fn list_sessions(state: web::Data<AppState>, principal: VerifiedPrincipal) -> Result<HttpResponse, AuthError> {
    let sessions = state.registry.list_sessions(principal.principal_id).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

/// `revoke_all` (§4.4 invariant 4): every outstanding refresh credential and
/// every currently-active access credential for the caller is invalidated.
pub async fn revoke_all_sessions(state: web::Data<AppState>, principal: VerifiedPrincipal) -> Result<HttpResponse, AuthError> {
    state.registry.revoke_all(principal.principal_id, state.access_ttl).await?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn jwks(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.codec.jwks())
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let store_ok = state.store.ping().await.is_ok();

    let status = if db_ok && store_ok { "healthy" } else { "degraded" };
    HttpResponse::Ok().json(HealthResponse {
        status,
        services: HealthServices {
            database: if db_ok { "up" } else { "down" },
            volatile_store: if store_ok { "up" } else { "down" },
            cache: if store_ok { "up" } else { "down" },
        },
    })
}

fn bearer_token(req: &actix_web::HttpRequest) -> Result<String, AuthError> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or(AuthError::MissingAuthorization)
}
