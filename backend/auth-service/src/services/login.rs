//! Login coordinator (C7, §4.6). Every branch that denies access returns
//! the identical `AuthError::InvalidCredentials` — no-such-user, wrong
//! password, locked, and inactive are indistinguishable to the caller (P1).

use crate::db::principal_repo;
use crate::metrics;
use crate::registry::CredentialRegistry;
use crate::security::password;
use crate::services::profile_cache::ProfileCache;
use chrono::Utc;
use error_types::AuthError;
use jwt_security::CredentialCodec;
use redis_utils::VolatileStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::AuthResponse;

#[derive(Clone)]
pub struct LoginCoordinator {
    pool: sqlx::PgPool,
    store: Arc<dyn VolatileStore>,
    codec: Arc<CredentialCodec>,
    registry: CredentialRegistry,
    profiles: ProfileCache,
    max_failed_attempts: u32,
    lockout: Duration,
    access_ttl: Duration,
}

impl LoginCoordinator {
    pub fn new(
        pool: sqlx::PgPool,
        store: Arc<dyn VolatileStore>,
        codec: Arc<CredentialCodec>,
        registry: CredentialRegistry,
        profiles: ProfileCache,
        max_failed_attempts: u32,
        lockout: Duration,
        access_ttl: Duration,
    ) -> Self {
        Self { pool, store, codec, registry, profiles, max_failed_attempts, lockout, access_ttl }
    }

    fn counter_key(email: &str) -> String {
        format!("failed_login:{email}")
    }

    async fn current_failed_count(&self, email: &str) -> u32 {
        self.store
            .get(&Self::counter_key(email))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Returns the post-increment count.
    async fn bump_failed_count(&self, email: &str) -> u32 {
        self.store
            .incr_with_initial_ttl(&Self::counter_key(email), self.lockout)
            .await
            .unwrap_or(0)
            .max(0) as u32
    }

    async fn reset_failed_count(&self, email: &str) {
        let _ = self.store.delete(&Self::counter_key(email)).await;
    }

    pub async fn login(
        &self,
        email: &str,
        supplied_password: &str,
        device_info: Option<String>,
        client_id: &str,
    ) -> Result<AuthResponse, AuthError> {
        let email = email.to_lowercase();
        metrics::inc_login_requests();

        // Step 1: lockout check — never touches the database or the hasher.
        if self.current_failed_count(&email).await >= self.max_failed_attempts {
            tracing::warn!(%email, %client_id, code = "AUTH_004", outcome = "locked", "login denied");
            metrics::inc_login_failures();
            metrics::inc_login_outcome("locked");
            return Err(AuthError::InvalidCredentials);
        }

        // Step 2: principal lookup.
        let principal = principal_repo::find_by_email(&self.pool, &email)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;

        let principal = match principal {
            Some(p) => p,
            None => {
                // Burn the same CPU a real verify would, so this branch is
                // indistinguishable in timing from "wrong password" (P1).
                let _ = password::verify(supplied_password, password::dummy_hash()).await;
                self.bump_failed_count(&email).await;
                tracing::warn!(%email, %client_id, code = "AUTH_001", outcome = "no_such_user", "login denied");
                metrics::inc_login_failures();
                metrics::inc_login_outcome("no_such_user");
                return Err(AuthError::InvalidCredentials);
            }
        };

        // Step 3: verify password.
        let matches = password::verify(supplied_password, &principal.password_hash).await?;
        if !matches {
            let count = self.bump_failed_count(&email).await;
            if count == self.max_failed_attempts {
                tracing::warn!(principal_id = principal.id, %email, code = "AUTH_004", outcome = "locked", "account locked after repeated failures");
                metrics::inc_account_lockouts();
            }
            tracing::warn!(principal_id = principal.id, %email, %client_id, code = "AUTH_001", outcome = "wrong_password", "login denied");
            metrics::inc_login_failures();
            metrics::inc_login_outcome("wrong_password");
            return Err(AuthError::InvalidCredentials);
        }

        // Step 4: active / soft-delete check.
        if !principal.is_authenticatable() {
            tracing::warn!(principal_id = principal.id, %email, code = "AUTH_005", outcome = "inactive", "login denied");
            metrics::inc_login_failures();
            metrics::inc_login_outcome("inactive");
            return Err(AuthError::InvalidCredentials);
        }

        // Step 5: roles/permissions projection, tiered cache.
        let projection = self.profiles.get(principal.id).await?;

        // Step 6: issue the pair, register the access jti.
        let access_token = self
            .codec
            .issue_access(principal.id, &principal.email, projection.roles.clone(), projection.permissions.clone(), HashMap::new())
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let refresh_token = self.codec.issue_refresh(principal.id).map_err(|e| AuthError::Internal(e.to_string()))?;

        let access_claims = self.codec.decode(&access_token).map_err(|e| AuthError::Internal(e.to_string()))?;
        let refresh_claims = self.codec.decode(&refresh_token).map_err(|e| AuthError::Internal(e.to_string()))?;

        self.registry.register_active(principal.id, &access_claims.jti, self.access_ttl).await?;

        let refresh_hash = hex::encode(crypto_core::hash::sha256(refresh_token.as_bytes()));
        let refresh_expires_at = chrono::DateTime::from_timestamp(refresh_claims.exp, 0).unwrap_or_else(Utc::now);

        // Step 7: advisory-locked transaction — insert refresh record, bump last_login.
        let principal_id = principal.id;
        let device = device_info.clone();
        let registry = self.registry.clone();
        db_pool::with_transaction(&self.pool, move |mut tx| {
            let registry = registry.clone();
            let device = device.clone();
            async move {
                db_pool::lock_principal(&mut tx, principal_id).await?;
                registry
                    .insert_refresh_in_tx(&mut tx, principal_id, &refresh_hash, device.as_deref(), refresh_expires_at)
                    .await
                    .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
                principal_repo::update_last_login_in_tx(&mut tx, principal_id).await?;
                Ok(((), tx))
            }
        })
        .await
        .map_err(|e: sqlx::Error| AuthError::Database(e.to_string()))?;

        // Step 8: reset the counter, emit success.
        self.reset_failed_count(&email).await;
        tracing::info!(principal_id = principal.id, %email, %client_id, outcome = "success", "login succeeded");
        metrics::inc_login_outcome("success");

        if password::needs_rehash(&principal.password_hash).await {
            if let Ok(rehashed) = password::hash(supplied_password).await {
                let _ = principal_repo::update_password_hash(&self.pool, principal.id, &rehashed).await;
            }
        }

        Ok(AuthResponse::new(access_token, refresh_token, access_claims.exp - access_claims.iat))
    }
}
