//! Refresh-record repository (§3 "Refresh record", §4.4 invariants 2-3).
//! Rotation and the login-path insert both need the advisory lock / single
//! transaction discipline `db_pool` provides; this module supplies the raw
//! statements the registry composes them from.

use crate::models::{RefreshRecord, RefreshRecordSummary};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

pub async fn find_usable_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<RefreshRecord>, sqlx::Error> {
    sqlx::query_as::<_, RefreshRecord>(
        "SELECT id, principal_id, token_hash, device_info, created_at, expires_at, revoked_at \
         FROM refresh_records WHERE token_hash = $1",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Insert within an already-open transaction (login coordinator, §4.6 step 7:
/// the advisory lock is acquired by the caller before this runs).
pub async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: i64,
    token_hash: &str,
    device_info: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO refresh_records (principal_id, token_hash, device_info, expires_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(principal_id)
    .bind(token_hash)
    .bind(device_info)
    .bind(expires_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Atomic rotation (§4.4 invariant 3): revoke the predecessor, insert the
/// successor, both within `tx` so a failure of either aborts the whole
/// transaction and no new refresh credential is returned to the caller.
///
/// The `UPDATE` takes a row lock on `old_hash`; a concurrent rotation of
/// the same hash blocks here until the winner commits, then finds
/// `revoked_at` already non-null and matches zero rows. Zero rows is not a
/// SQL error by itself, so it's checked explicitly and turned into
/// `RowNotFound` — otherwise the loser would silently skip the revoke and
/// still insert a second successor, breaking at-most-once rotation (P3).
pub async fn rotate_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    old_hash: &str,
    principal_id: i64,
    new_hash: &str,
    device_info: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query("UPDATE refresh_records SET revoked_at = now() WHERE token_hash = $1 AND revoked_at IS NULL")
        .bind(old_hash)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }

    insert_in_tx(tx, principal_id, new_hash, device_info, expires_at).await
}

/// Logout with a supplied refresh credential: idempotent, tolerates an
/// already-revoked or unknown hash.
pub async fn revoke_by_hash(pool: &PgPool, token_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE refresh_records SET revoked_at = now() WHERE token_hash = $1 AND revoked_at IS NULL")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// `revoke_all(principal)` persistent-side step (§4.4 invariant 4, step 1).
pub async fn revoke_all_for_principal(pool: &PgPool, principal_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE refresh_records SET revoked_at = now() WHERE principal_id = $1 AND revoked_at IS NULL")
        .bind(principal_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Backs `GET /api/v1/auth/sessions` — device descriptor and timestamps
/// only, never the hash.
pub async fn list_for_principal(
    pool: &PgPool,
    principal_id: i64,
) -> Result<Vec<RefreshRecordSummary>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RefreshRecord>(
        "SELECT id, principal_id, token_hash, device_info, created_at, expires_at, revoked_at \
         FROM refresh_records WHERE principal_id = $1 AND revoked_at IS NULL AND expires_at > now() \
         ORDER BY created_at DESC",
    )
    .bind(principal_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(RefreshRecordSummary::from).collect())
}
