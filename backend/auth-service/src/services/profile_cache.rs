//! Tiered `{roles, permissions}` projection cache (§4.6 step 5, §3 "Cache
//! entries"). Redis hot tier first, the persistent `cache_entries` table
//! second, relational source of truth last. A miss at any tier is
//! authoritative "re-resolve from source" — never treated as an error.

use crate::db::{cache_repo, principal_repo};
use crate::models::ProfileProjection;
use chrono::{Duration as ChronoDuration, Utc};
use error_types::AuthError;
use redis_utils::VolatileStore;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const CACHE_TTL_SECS: u64 = 300;

fn hot_key(principal_id: i64) -> String {
    format!("profile:{principal_id}")
}

fn cold_key(principal_id: i64) -> String {
    format!("profile:{principal_id}:cold")
}

#[derive(Clone)]
pub struct ProfileCache {
    pool: PgPool,
    store: Arc<dyn VolatileStore>,
}

impl ProfileCache {
    pub fn new(pool: PgPool, store: Arc<dyn VolatileStore>) -> Self {
        Self { pool, store }
    }

    pub async fn get(&self, principal_id: i64) -> Result<ProfileProjection, AuthError> {
        if let Ok(Some(raw)) = self.store.get(&hot_key(principal_id)).await {
            if let Ok(projection) = serde_json::from_str::<ProfileProjection>(&raw) {
                return Ok(projection);
            }
        }

        if let Ok(Some(projection)) = cache_repo::get::<ProfileProjection>(&self.pool, &cold_key(principal_id)).await {
            let _ = self.populate_hot(principal_id, &projection).await;
            return Ok(projection);
        }

        let projection = principal_repo::resolve_profile_projection(&self.pool, principal_id)
            .await
            .map_err(|e| AuthError::Database(e.to_string()))?;
        self.populate(principal_id, &projection).await;
        Ok(projection)
    }

    async fn populate_hot(&self, principal_id: i64, projection: &ProfileProjection) -> Result<(), AuthError> {
        let raw = serde_json::to_string(projection).map_err(|e| AuthError::Internal(e.to_string()))?;
        self.store
            .set_ex(&hot_key(principal_id), &raw, Duration::from_secs(CACHE_TTL_SECS))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    async fn populate(&self, principal_id: i64, projection: &ProfileProjection) {
        let _ = self.populate_hot(principal_id, projection).await;
        let expires_at = Utc::now() + ChronoDuration::seconds(CACHE_TTL_SECS as i64);
        if let Err(err) = cache_repo::set(&self.pool, &cold_key(principal_id), projection, expires_at).await {
            tracing::warn!(error = %err, principal_id, "failed to populate cold profile cache tier");
        }
    }

    /// Invalidate both tiers for one principal (§3 invariant on role/profile
    /// writes). Accepted as a ≤5-minute staleness contract elsewhere
    /// (DESIGN.md "Open questions, decided") rather than a hard guarantee
    /// backed by pub/sub.
    pub async fn invalidate(&self, principal_id: i64) {
        let _ = self.store.delete(&hot_key(principal_id)).await;
        let _ = cache_repo::delete(&self.pool, &cold_key(principal_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::InMemoryStore;

    #[tokio::test]
    async fn hot_tier_hit_round_trips_projection() {
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let projection = ProfileProjection { roles: vec!["admin".into()], permissions: vec!["auth:read".into()] };
        let raw = serde_json::to_string(&projection).unwrap();
        store.set_ex(&hot_key(7), &raw, Duration::from_secs(60)).await.unwrap();

        let cached: ProfileProjection = serde_json::from_str(&store.get(&hot_key(7)).await.unwrap().unwrap()).unwrap();
        assert_eq!(cached.roles, vec!["admin".to_string()]);
    }
}
