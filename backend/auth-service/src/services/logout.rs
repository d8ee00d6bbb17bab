//! Logout coordinator (C9, §4.8). Invalidates one access credential (and,
//! optionally, the refresh credential presented alongside it) without
//! requiring either to still be live — a client logging out with a
//! credential that already expired is a no-op, not an error, since an
//! expired credential can no longer authenticate anything.

use crate::registry::CredentialRegistry;
use error_types::AuthError;
use jwt_security::{CodecError, CredentialCodec};
use std::sync::Arc;

#[derive(Clone)]
pub struct LogoutCoordinator {
    codec: Arc<CredentialCodec>,
    registry: CredentialRegistry,
}

impl LogoutCoordinator {
    pub fn new(codec: Arc<CredentialCodec>, registry: CredentialRegistry) -> Self {
        Self { codec, registry }
    }

    /// §4.8: blacklist the access credential's `jti` for its remaining
    /// lifetime and drop it from the active set; revoke the refresh
    /// credential's persisted record if one was supplied. Malformed input is
    /// the only error case — an already-expired or already-revoked
    /// credential is treated as already logged out.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), AuthError> {
        match self.codec.decode(access_token) {
            Ok(claims) => {
                let principal_id: i64 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
                self.registry.blacklist_and_deactivate(principal_id, &claims.jti, claims.exp).await?;
                tracing::info!(principal_id, outcome = "success", "logout blacklisted access credential");
            }
            Err(CodecError::Expired) => {
                tracing::debug!("logout presented an already-expired access credential, nothing to blacklist");
            }
            Err(CodecError::Malformed(_)) => return Err(AuthError::InvalidToken),
        }

        if let Some(refresh_token) = refresh_token {
            let hash = hex::encode(crypto_core::hash::sha256(refresh_token.as_bytes()));
            self.registry.revoke_refresh_by_hash(&hash).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::{InMemoryStore, VolatileStore};
    use sqlx::PgPool;
    use std::collections::HashMap;

    fn fake_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool never connects")
    }

    #[tokio::test]
    async fn logout_removes_credential_from_active_set() {
        let codec = Arc::new(CredentialCodec::for_tests("unit-test-signing-key-that-is-long-enough-32b"));
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry::new(fake_pool(), store.clone());
        let coordinator = LogoutCoordinator::new(codec.clone(), registry.clone());

        let token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let claims = codec.decode(&token).unwrap();
        store.set_add("active:1", &claims.jti).await.unwrap();

        coordinator.logout(&token, None).await.unwrap();
        assert!(!registry.is_credential_live(1, &claims.jti).await.unwrap());
    }

    #[tokio::test]
    async fn logout_with_malformed_access_token_is_rejected() {
        let codec = Arc::new(CredentialCodec::for_tests("unit-test-signing-key-that-is-long-enough-32b"));
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry::new(fake_pool(), store);
        let coordinator = LogoutCoordinator::new(codec, registry);

        let err = coordinator.logout("not-a-jwt", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
