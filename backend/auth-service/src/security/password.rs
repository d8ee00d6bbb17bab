//! Password verifier (C2): Argon2id hashing with a tunable cost parameter,
//! constant-time verification, and the fixed strength policy of §4.2.
//! `hash`/`verify` run on `spawn_blocking` so a ~100-300ms hash never stalls
//! an actix worker thread (§5 "Password hash/verify must be offloaded").

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};
use error_types::AuthError;
use rand::rngs::OsRng;

/// ~100-300ms on typical server hardware at 19MiB/2 iterations/1 lane.
fn params() -> Params {
    Params::new(19 * 1024, 2, 1, None).expect("static argon2 params are valid")
}

fn hasher() -> Argon2<'static> {
    Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params())
}

/// Length >= 8, >=1 upper, >=1 lower, >=1 digit, >=1 punctuation. Applied
/// only on hash (registration/password-change), never on verify.
pub fn validate_strength(password: &str) -> Result<(), AuthError> {
    let long_enough = password.len() >= 8;
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_punct = password.chars().any(|c| c.is_ascii_punctuation());

    if long_enough && has_upper && has_lower && has_digit && has_punct {
        Ok(())
    } else {
        Err(AuthError::WeakPassword(
            "password must be at least 8 characters and include upper, lower, digit, and punctuation".to_string(),
        ))
    }
}

fn hash_blocking(password: &str) -> Result<String, AuthError> {
    validate_strength(password)?;
    let salt = SaltString::generate(&mut OsRng);
    hasher()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(format!("password hash failed: {e}")))
}

fn verify_blocking(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AuthError::Internal(format!("stored password hash is malformed: {e}")))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

/// Whether `hash` was produced with a weaker cost parameter than the
/// current target, so a caller can opportunistically re-hash on the next
/// successful login.
fn needs_rehash_blocking(hash: &str) -> bool {
    match PasswordHash::new(hash).and_then(|parsed| Params::try_from(&parsed)) {
        Ok(existing) => existing.m_cost() < params().m_cost() || existing.t_cost() < params().t_cost(),
        Err(_) => true,
    }
}

pub async fn hash(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("password hashing task panicked: {e}")))?
}

pub async fn verify(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("password verification task panicked: {e}")))?
}

pub async fn needs_rehash(hash: &str) -> bool {
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || needs_rehash_blocking(&hash))
        .await
        .unwrap_or(false)
}

/// A constant pre-hashed value the login coordinator verifies against when
/// the principal doesn't exist, so the "no such user" branch performs the
/// same CPU work as the "wrong password" branch (§9 anti-enumeration).
pub fn dummy_hash() -> &'static str {
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$GwEl6+nWXG4Z5xY1k4v5K8x0Vx8k6q1ZqQ8d1y3m8mE"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify_roundtrips() {
        let h = hash("SecurePass123!").await.unwrap();
        assert!(verify("SecurePass123!", &h).await.unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let h = hash("SecurePass123!").await.unwrap();
        assert!(!verify("WrongPass123!", &h).await.unwrap());
    }

    #[test]
    fn strength_rejects_too_short() {
        assert!(validate_strength("Sh0rt!").is_err());
    }

    #[test]
    fn strength_rejects_missing_uppercase() {
        assert!(validate_strength("securepass123!").is_err());
    }

    #[test]
    fn strength_rejects_missing_punctuation() {
        assert!(validate_strength("SecurePass123").is_err());
    }

    #[test]
    fn strength_accepts_valid_password() {
        assert!(validate_strength("SecurePass123!").is_ok());
    }

    #[tokio::test]
    async fn dummy_hash_is_verifiable_so_the_cpu_profile_matches_real_logins() {
        assert!(!verify("anything", dummy_hash()).await.unwrap());
    }
}
