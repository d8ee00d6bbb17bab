//! C10 verification gate: per-request bearer-credential validation for the
//! issuer's own endpoints (downstream consumers normally run the cheaper
//! local-JWKS mode described in the spec; this extractor is the "remote
//! mode" logic, reused by the issuer itself since it always has direct
//! access to the registry).
//!
//! Order of checks mirrors the credential registry invariant: decode first
//! (signature/issuer/expiry), then active-set membership (cheap, and its
//! absence is the decisive revocation signal), then the blacklist
//! (defensive, for credentials issued before a restart cleared the active
//! set).

use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use error_types::AuthError;
use futures::future::LocalBoxFuture;
use jwt_security::{Claims, CredentialCodec};
use redis_utils::VolatileStore;
use std::sync::Arc;

/// The principal identity carried by a verified access credential, inserted
/// into request extensions so handlers can extract it without re-decoding.
#[derive(Debug, Clone)]
pub struct VerifiedPrincipal {
    pub principal_id: i64,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub jti: String,
    pub exp: i64,
}

impl VerifiedPrincipal {
    fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let principal_id: i64 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        Ok(Self {
            principal_id,
            email: claims.email,
            roles: claims.roles,
            permissions: claims.permissions,
            jti: claims.jti,
            exp: claims.exp,
        })
    }
}

/// Shared gate: holds the codec (to decode) and the volatile store (to check
/// active-set + blacklist). Constructed once at startup and cloned into
/// `actix_web::web::Data`.
#[derive(Clone)]
pub struct VerificationGate {
    codec: Arc<CredentialCodec>,
    store: Arc<dyn VolatileStore>,
}

impl VerificationGate {
    pub fn new(codec: Arc<CredentialCodec>, store: Arc<dyn VolatileStore>) -> Self {
        Self { codec, store }
    }

    fn active_set_key(principal_id: i64) -> String {
        format!("active:{}", principal_id)
    }

    fn blacklist_key(jti: &str) -> String {
        format!("blacklist:{}", jti)
    }

    /// Full registry check used both by the `FromRequest` extractor and by
    /// the `/introspect` handler: decode, then active-set, then blacklist.
    pub async fn verify(&self, token: &str) -> Result<VerifiedPrincipal, AuthError> {
        let claims = self.codec.decode(token).map_err(|err| match err {
            jwt_security::CodecError::Expired => AuthError::Expired,
            jwt_security::CodecError::Malformed(_) => AuthError::InvalidToken,
        })?;

        if claims.token_type != "access" {
            return Err(AuthError::InvalidToken);
        }

        let principal = VerifiedPrincipal::from_claims(claims)?;

        let in_active_set = self
            .store
            .set_is_member(&Self::active_set_key(principal.principal_id), &principal.jti)
            .await
            .map_err(|_| AuthError::TokenRevoked)?;
        if !in_active_set {
            return Err(AuthError::TokenRevoked);
        }

        let blacklisted = self
            .store
            .exists(&Self::blacklist_key(&principal.jti))
            .await
            .map_err(|_| AuthError::TokenRevoked)?;
        if blacklisted {
            return Err(AuthError::TokenRevoked);
        }

        Ok(principal)
    }
}

fn bearer_token(req: &HttpRequest) -> Result<String, AuthError> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthorization)?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(AuthError::MissingAuthorization)
}

/// Extractor sugar: `async fn handler(principal: VerifiedPrincipal)`. The
/// gate itself must be present in app data; a request without one is a
/// wiring bug, not a client error, so it maps to `InvalidToken` rather than
/// panicking.
impl FromRequest for VerifiedPrincipal {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            if let Some(cached) = req.extensions().get::<VerifiedPrincipal>() {
                return Ok(cached.clone());
            }
            let gate = req
                .app_data::<actix_web::web::Data<VerificationGate>>()
                .cloned()
                .ok_or(AuthError::Internal("verification gate not configured".into()))?;
            let token = bearer_token(&req)?;
            let principal = gate.verify(&token).await?;
            req.extensions_mut().insert(principal.clone());
            Ok(principal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::InMemoryStore;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_codec() -> CredentialCodec {
        CredentialCodec::for_tests("unit-test-signing-key-that-is-long-enough-32b")
    }

    #[tokio::test]
    async fn verify_accepts_credential_registered_in_active_set() {
        let codec = Arc::new(test_codec());
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let gate = VerificationGate::new(codec.clone(), store.clone());

        let token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let claims = codec.decode(&token).unwrap();
        store.set_add("active:1", &claims.jti).await.unwrap();

        let principal = gate.verify(&token).await.unwrap();
        assert_eq!(principal.principal_id, 1);
    }

    #[tokio::test]
    async fn verify_rejects_credential_absent_from_active_set() {
        let codec = Arc::new(test_codec());
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let gate = VerificationGate::new(codec.clone(), store);

        let token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let err = gate.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn verify_rejects_blacklisted_credential_even_if_in_active_set() {
        let codec = Arc::new(test_codec());
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let gate = VerificationGate::new(codec.clone(), store.clone());

        let token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let claims = codec.decode(&token).unwrap();
        store.set_add("active:1", &claims.jti).await.unwrap();
        store.set_ex(&format!("blacklist:{}", claims.jti), "1", Duration::from_secs(60)).await.unwrap();

        let err = gate.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn verify_rejects_refresh_typed_credential() {
        let codec = Arc::new(test_codec());
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let gate = VerificationGate::new(codec.clone(), store);

        let token = codec.issue_refresh(1).unwrap();
        let err = gate.verify(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
