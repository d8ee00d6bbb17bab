//! Credential registry (C5): the two-tier registry of §4.4, composing the
//! volatile active-access set + blacklist (C3) with the persistent refresh
//! record table (C4). The login/refresh/logout coordinators in `services`
//! are the only callers — nothing else touches either store directly for
//! credential lifecycle state.

use crate::db::refresh_repo;
use crate::models::RefreshRecordSummary;
use chrono::{DateTime, Utc};
use error_types::AuthError;
use redis_utils::{PipelineOp, VolatileStore};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

fn active_set_key(principal_id: i64) -> String {
    format!("active:{principal_id}")
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

#[derive(Clone)]
pub struct CredentialRegistry {
    pool: PgPool,
    store: Arc<dyn VolatileStore>,
}

impl CredentialRegistry {
    pub fn new(pool: PgPool, store: Arc<dyn VolatileStore>) -> Self {
        Self { pool, store }
    }

    /// Register a freshly issued access credential's `jti` (§4.6 step 6,
    /// P5). The set's own TTL is refreshed to the access lifetime on every
    /// add so it always outlives its newest member.
    pub async fn register_active(
        &self,
        principal_id: i64,
        jti: &str,
        access_ttl: Duration,
    ) -> Result<(), AuthError> {
        let key = active_set_key(principal_id);
        self.store.set_add(&key, jti).await.map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store.set_expire(&key, access_ttl).await.map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Full verification check (§4.4 invariant 1): active-set membership
    /// first (cheap, decisive on explicit revocation), blacklist second
    /// (defensive). Any store error fails closed as "revoked".
    pub async fn is_credential_live(&self, principal_id: i64, jti: &str) -> Result<bool, AuthError> {
        let in_active_set = self
            .store
            .set_is_member(&active_set_key(principal_id), jti)
            .await
            .map_err(|_| AuthError::TokenRevoked)?;
        if !in_active_set {
            return Ok(false);
        }

        let blacklisted = self
            .store
            .exists(&blacklist_key(jti))
            .await
            .map_err(|_| AuthError::TokenRevoked)?;
        Ok(!blacklisted)
    }

    /// Logout of one access credential (§4.8): blacklist `jti` with TTL
    /// equal to its remaining lifetime, then drop it from the active set.
    pub async fn blacklist_and_deactivate(
        &self,
        principal_id: i64,
        jti: &str,
        exp_unix: i64,
    ) -> Result<(), AuthError> {
        let remaining = (exp_unix - Utc::now().timestamp()).max(0);
        self.store
            .set_ex(&blacklist_key(jti), "1", Duration::from_secs(remaining as u64))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store
            .set_remove(&active_set_key(principal_id), jti)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(())
    }

    /// `revoke_all(principal)` (§4.4 invariant 4): persistent side first —
    /// that alone makes every outstanding refresh credential unusable even
    /// if the volatile steps below fail and must be retried. The active-set
    /// read + blacklist pipeline + clear is best-effort idempotent: a retry
    /// after partial failure re-blacklists JTIs already blacklisted, which
    /// is harmless.
    pub async fn revoke_all(&self, principal_id: i64, access_ttl: Duration) -> Result<(), AuthError> {
        refresh_repo::revoke_all_for_principal(&self.pool, principal_id)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        let key = active_set_key(principal_id);
        let members = self.store.set_members(&key).await.map_err(|e| AuthError::Internal(e.to_string()))?;

        if !members.is_empty() {
            let ops = members
                .iter()
                .map(|jti| PipelineOp::SetEx {
                    key: blacklist_key(jti),
                    value: "1".to_string(),
                    ttl: access_ttl,
                })
                .collect();
            self.store.pipeline(ops).await.map_err(|e| AuthError::Internal(e.to_string()))?;
        }

        self.store.delete(&key).await.map_err(|e| AuthError::Internal(e.to_string()))?;
        Ok(())
    }

    pub async fn find_usable_refresh(
        &self,
        token_hash: &str,
    ) -> Result<Option<(i64, Option<String>)>, AuthError> {
        let record = refresh_repo::find_usable_by_hash(&self.pool, token_hash)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;
        Ok(record.filter(|r| r.is_usable()).map(|r| (r.principal_id, r.device_info)))
    }

    pub async fn insert_refresh_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        principal_id: i64,
        token_hash: &str,
        device_info: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        refresh_repo::insert_in_tx(tx, principal_id, token_hash, device_info, expires_at)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))
    }

    /// Rotates `old_hash` to `new_hash` in one transaction (§4.4 invariant
    /// 3). A concurrent rotation that already revoked `old_hash` surfaces
    /// as `RowNotFound` from `rotate_in_tx`; that's not a database failure,
    /// it's the at-most-once guarantee doing its job (P3), so it maps to
    /// the same `InvalidRefresh` a replayed or expired credential would get
    /// rather than a generic 500.
    pub async fn rotate_refresh(
        &self,
        old_hash: &str,
        principal_id: i64,
        new_hash: &str,
        device_info: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        db_pool::with_transaction(&self.pool, |mut tx| async move {
            refresh_repo::rotate_in_tx(&mut tx, old_hash, principal_id, new_hash, device_info, expires_at)
                .await
                .map(|_| ((), tx))
        })
        .await
        .map_err(|e: sqlx::Error| match e {
            sqlx::Error::RowNotFound => AuthError::InvalidRefresh,
            other => AuthError::Database(other.to_string()),
        })
    }

    pub async fn revoke_refresh_by_hash(&self, token_hash: &str) -> Result<(), AuthError> {
        refresh_repo::revoke_by_hash(&self.pool, token_hash)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))
    }

    pub async fn list_sessions(&self, principal_id: i64) -> Result<Vec<RefreshRecordSummary>, AuthError> {
        refresh_repo::list_for_principal(&self.pool, principal_id)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::InMemoryStore;

    // The volatile-only operations (register/check/blacklist) don't touch
    // the pool at all; covered here without a live Postgres. Everything
    // that reaches `refresh_repo` is covered by the coordinator tests in
    // `tests/coordinators.rs`, which run against a real database.

    #[tokio::test]
    async fn register_then_check_reports_live_credential() {
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry { pool: fake_pool(), store: store.clone() };
        registry.register_active(1, "jti-a", Duration::from_secs(60)).await.unwrap();
        assert!(registry.is_credential_live(1, "jti-a").await.unwrap());
    }

    #[tokio::test]
    async fn unregistered_credential_is_not_live() {
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry { pool: fake_pool(), store };
        assert!(!registry.is_credential_live(1, "jti-missing").await.unwrap());
    }

    #[tokio::test]
    async fn blacklisting_removes_liveness_even_if_still_in_active_set() {
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let registry = CredentialRegistry { pool: fake_pool(), store: store.clone() };
        registry.register_active(1, "jti-a", Duration::from_secs(60)).await.unwrap();
        let exp = Utc::now().timestamp() + 60;
        registry.blacklist_and_deactivate(1, "jti-a", exp).await.unwrap();
        assert!(!registry.is_credential_live(1, "jti-a").await.unwrap());
    }

    fn fake_pool() -> PgPool {
        // `PgPool` has no lazy/offline constructor usable without `sqlx::test`;
        // the volatile-only assertions above never touch it.
        PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool never connects")
    }
}
