//! Refresh coordinator (C8, §4.7): exchanges a usable refresh credential for
//! a fresh access/refresh pair and rotates the persisted record in one
//! transaction. Mirrors the login coordinator's shape — decode, look up,
//! check, issue, commit — but starts from a credential instead of a password.

use crate::db::principal_repo;
use crate::models::AuthResponse;
use crate::registry::CredentialRegistry;
use crate::services::profile_cache::ProfileCache;
use chrono::Utc;
use error_types::AuthError;
use jwt_security::CredentialCodec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RefreshCoordinator {
    pool: sqlx::PgPool,
    codec: Arc<CredentialCodec>,
    registry: CredentialRegistry,
    profiles: ProfileCache,
    access_ttl: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        pool: sqlx::PgPool,
        codec: Arc<CredentialCodec>,
        registry: CredentialRegistry,
        profiles: ProfileCache,
        access_ttl: Duration,
    ) -> Self {
        Self { pool, codec, registry, profiles, access_ttl }
    }

    /// §4.7 steps: decode → look up the persisted record by hash → confirm
    /// the principal is still authenticatable → issue a new pair → rotate
    /// the record atomically (P3: at-most-once use of any given refresh hash).
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        // Step 1: decode. An expired or malformed refresh credential is
        // indistinguishable to the caller — both map to the same error.
        let claims = self.codec.decode(refresh_token).map_err(|_| AuthError::InvalidRefresh)?;
        if claims.token_type != "refresh" {
            return Err(AuthError::InvalidRefresh);
        }

        let principal_id: i64 = claims.sub.parse().map_err(|_| AuthError::InvalidRefresh)?;

        // Step 2: the persisted record is the actual revocation authority —
        // a structurally valid but rotated/revoked/expired hash is rejected
        // here even though the JWT itself still verifies.
        let old_hash = hex::encode(crypto_core::hash::sha256(refresh_token.as_bytes()));
        let (record_principal_id, device_info) = self
            .registry
            .find_usable_refresh(&old_hash)
            .await?
            .ok_or(AuthError::InvalidRefresh)?;
        if record_principal_id != principal_id {
            return Err(AuthError::InvalidRefresh);
        }

        // Step 3: active / soft-delete check — a deactivated principal's
        // outstanding refresh credentials stop working immediately.
        let principal = principal_repo::find_by_id(&self.pool, principal_id)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?
            .ok_or(AuthError::InvalidRefresh)?;
        if !principal.is_authenticatable() {
            return Err(AuthError::InvalidRefresh);
        }

        // Step 4: issue the new pair and register the new access jti.
        let projection = self.profiles.get(principal.id).await?;
        let access_token = self
            .codec
            .issue_access(principal.id, &principal.email, projection.roles, projection.permissions, HashMap::new())
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let new_refresh_token = self.codec.issue_refresh(principal.id).map_err(|e| AuthError::Internal(e.to_string()))?;

        let access_claims = self.codec.decode(&access_token).map_err(|e| AuthError::Internal(e.to_string()))?;
        let refresh_claims = self.codec.decode(&new_refresh_token).map_err(|e| AuthError::Internal(e.to_string()))?;

        self.registry.register_active(principal.id, &access_claims.jti, self.access_ttl).await?;

        // Step 5: atomic rotation — revoke the old record, insert the new
        // one, both or neither (P3).
        let new_hash = hex::encode(crypto_core::hash::sha256(new_refresh_token.as_bytes()));
        let new_expires_at = chrono::DateTime::from_timestamp(refresh_claims.exp, 0).unwrap_or_else(Utc::now);
        self.registry
            .rotate_refresh(&old_hash, principal.id, &new_hash, device_info.as_deref(), new_expires_at)
            .await?;

        tracing::info!(principal_id = principal.id, outcome = "refresh_rotated", "refresh credential rotated");

        Ok(AuthResponse::new(access_token, new_refresh_token, access_claims.exp - access_claims.iat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::InMemoryStore;
    use sqlx::PgPool;

    fn fake_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool never connects")
    }

    #[tokio::test]
    async fn rejects_refresh_typed_check_for_an_access_credential() {
        let codec = Arc::new(CredentialCodec::for_tests("unit-test-signing-key-that-is-long-enough-32b"));
        let pool = fake_pool();
        let store: Arc<dyn redis_utils::VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry::new(pool.clone(), store.clone());
        let profiles = ProfileCache::new(pool.clone(), store);
        let coordinator = RefreshCoordinator::new(pool, codec.clone(), registry, profiles, Duration::from_secs(1800));

        let access_token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let err = coordinator.refresh(&access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefresh));
    }

    #[tokio::test]
    async fn unknown_hash_is_rejected_as_invalid_refresh() {
        let codec = Arc::new(CredentialCodec::for_tests("unit-test-signing-key-that-is-long-enough-32b"));
        let pool = fake_pool();
        let store: Arc<dyn redis_utils::VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry::new(pool.clone(), store.clone());
        let profiles = ProfileCache::new(pool.clone(), store);
        let coordinator = RefreshCoordinator::new(pool, codec.clone(), registry, profiles, Duration::from_secs(1800));

        let refresh_token = codec.issue_refresh(1).unwrap();
        let err = coordinator.refresh(&refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefresh));
    }
}
