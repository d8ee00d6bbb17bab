//! PostgreSQL advisory locks
//!
//! Serializes a critical section across processes without a durable row to
//! lock. Used by the login coordinator to make concurrent logins for one
//! principal race-free: the lock is held for the
//! lifetime of the transaction and released automatically on commit or
//! rollback, so a panic or early return can never leak it.

use sqlx::{Postgres, Transaction};

/// Acquire a session-scoped advisory lock keyed by `principal_id`, blocking
/// until it is available. Held for the life of `tx`; released on commit or
/// rollback (`pg_advisory_xact_lock` ties the lock to the transaction, not
/// the connection, so there is no separate unlock call).
pub async fn lock_principal(
    tx: &mut Transaction<'_, Postgres>,
    principal_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(principal_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // Exercising a real advisory lock requires a live Postgres connection;
    // covered by the coordinator tests in auth-service/tests/coordinators.rs.
}
