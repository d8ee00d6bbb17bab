//! Principal read projection (§3 "Principal", "Role and Permission").
//! Creation/update of profile fields is an external collaborator; this repo
//! only reads, plus the two narrow writes the coordinators own:
//! `last_login_at` (C7 step 7) and `password_hash` (opportunistic rehash).

use crate::models::{Principal, ProfileProjection};
use sqlx::PgPool;

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Principal>, sqlx::Error> {
    sqlx::query_as::<_, Principal>(
        "SELECT id, email, password_hash, active, deleted_at FROM principals WHERE email = $1",
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, principal_id: i64) -> Result<Option<Principal>, sqlx::Error> {
    sqlx::query_as::<_, Principal>(
        "SELECT id, email, password_hash, active, deleted_at FROM principals WHERE id = $1",
    )
    .bind(principal_id)
    .fetch_optional(pool)
    .await
}

/// Resolve the `{roles, permissions}` projection straight from source,
/// bypassing any cache tier — used on a cache miss (§4.6 step 5).
pub async fn resolve_profile_projection(
    pool: &PgPool,
    principal_id: i64,
) -> Result<ProfileProjection, sqlx::Error> {
    let roles: Vec<String> = sqlx::query_scalar(
        "SELECT role FROM principal_roles WHERE principal_id = $1 ORDER BY role",
    )
    .bind(principal_id)
    .fetch_all(pool)
    .await?;

    let permissions: Vec<String> = if roles.is_empty() {
        Vec::new()
    } else {
        sqlx::query_scalar(
            "SELECT DISTINCT permission FROM role_permissions WHERE role = ANY($1) ORDER BY permission",
        )
        .bind(&roles)
        .fetch_all(pool)
        .await?
    };

    Ok(ProfileProjection { roles, permissions })
}

pub async fn update_last_login(pool: &PgPool, principal_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE principals SET last_login_at = now() WHERE id = $1")
        .bind(principal_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Same write, issued inside the login coordinator's transaction (§4.6
/// step 7) so it commits atomically with the refresh-record insert.
pub async fn update_last_login_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    principal_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE principals SET last_login_at = now() WHERE id = $1")
        .bind(principal_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Opportunistic rehash when `PasswordVerifier::needs_rehash` says the
/// stored cost parameter is stale (§4.2).
pub async fn update_password_hash(
    pool: &PgPool,
    principal_id: i64,
    new_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE principals SET password_hash = $1 WHERE id = $2")
        .bind(new_hash)
        .bind(principal_id)
        .execute(pool)
        .await?;
    Ok(())
}
