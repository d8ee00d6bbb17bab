//! Persistent cold-tier cache (§3 "Cache entries"): a JSON key/value table
//! with explicit expiration, used for the principal projection behind the
//! two-tier cache in `services::profile_cache`. Exposes the same
//! operational shape (`get`, `set`, `delete`, `delete_pattern`,
//! `cleanup_expired`, `stats`) the spec names so the cold and hot tiers are
//! interchangeable from a caller's perspective.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

pub async fn get<T: DeserializeOwned>(pool: &PgPool, key: &str) -> Result<Option<T>, sqlx::Error> {
    let row: Option<(Value,)> = sqlx::query_as(
        "SELECT value FROM cache_entries WHERE key = $1 AND expires_at > now()",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(v,)| serde_json::from_value(v).ok()))
}

pub async fn set<T: Serialize>(
    pool: &PgPool,
    key: &str,
    value: &T,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let json = serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        "INSERT INTO cache_entries (key, value, expires_at) VALUES ($1, $2, $3) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
    )
    .bind(key)
    .bind(json)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cache_entries WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// `pattern` is a SQL `LIKE` pattern (e.g. `"profile:42:%"`); used to
/// invalidate every cache entry for one principal in one statement (§3
/// "all writes that change a principal's roles or profile MUST invalidate
/// both tiers").
pub async fn delete_pattern(pool: &PgPool, pattern: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE key LIKE $1")
        .bind(pattern)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Periodic sweep (default interval 1h, §5 "Shared resources").
pub async fn cleanup_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub expired_entries: i64,
}

pub async fn stats(pool: &PgPool) -> Result<CacheStats, sqlx::Error> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries").fetch_one(pool).await?;
    let expired: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE expires_at <= now()")
        .fetch_one(pool)
        .await?;
    Ok(CacheStats { total_entries: total, expired_entries: expired })
}

/// Background task spawned from `main`: sweeps expired cache rows on a
/// fixed interval so the table doesn't grow unbounded between reads.
pub fn spawn_cleanup_task(pool: PgPool, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match cleanup_expired(&pool).await {
                Ok(n) if n > 0 => tracing::debug!(deleted = n, "cache cleanup swept expired entries"),
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "cache cleanup sweep failed"),
            }
        }
    });
}
