//! Credential codec: signs, verifies, and introspects bearer credentials
//! for the auth core, and publishes the public verification key set.
//!
//! Four credential types share one claim shape: `access`, `refresh`,
//! `mfa_pending`, `password_reset`. Only `access` carries the profile
//! projection (`roles`, `permissions`); the others exist purely to prove
//! "this principal, this purpose, this expiry".
//!
//! Signing policy: RS256 with a configured key pair is the production
//! default. HS256 with a shared secret is accepted only outside production,
//! and only once the secret clears [`secret_validation::validate_secret_strength`].
//! `CredentialCodec::from_env` enforces this at startup so a misconfigured
//! production deploy fails to boot rather than silently signing with a weak
//! key. Rotating the active signing key is out of scope for this core (§1
//! non-goals) — the key loaded at startup is the key used for the life of
//! the process.

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

pub mod secret_validation;

pub use secret_validation::{validate_secret_strength, SecretStrength};

/// Weak-secret patterns the startup check refuses regardless of length,
/// named explicitly in the startup-refusal policy below.
const WEAK_SECRET_PATTERNS: &[&str] = &["dev", "test", "change", "secret", "password", "default"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Access,
    Refresh,
    MfaPending,
    PasswordReset,
}

impl CredentialType {
    fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Access => "access",
            CredentialType::Refresh => "refresh",
            CredentialType::MfaPending => "mfa_pending",
            CredentialType::PasswordReset => "password_reset",
        }
    }
}

/// Claims carried by every credential. `roles`/`permissions` are empty on
/// every type but `access`; downstream validators must tolerate unknown
/// fields since extra claims may be attached to an access credential by a
/// caller (§6 "Credential claims").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(flatten, default)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("credential has expired")]
    Expired,
    #[error("credential is malformed or has an invalid signature: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for CodecError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => CodecError::Expired,
            _ => CodecError::Malformed(err.to_string()),
        }
    }
}

enum SigningKey {
    Rsa { encoding: EncodingKey, decoding: DecodingKey, kid: String, public_key: rsa::RsaPublicKey },
    Hmac { secret: String },
}

/// The codec's fixed-lifetime policy. Lifetimes for access/refresh are
/// configurable; `mfa_pending` and `password_reset` are always fixed.
struct Lifetimes {
    access: Duration,
    refresh: Duration,
}

pub struct CredentialCodec {
    key: SigningKey,
    issuer: String,
    lifetimes: Lifetimes,
}

impl CredentialCodec {
    /// Build the codec from environment variables: production must have a
    /// real RSA key pair and a TLS-reachable volatile store URL; HMAC is
    /// only acceptable outside production and only with a strong secret.
    pub fn from_env() -> Result<Self> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "development".to_string());
        let is_production = env == "production";

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "auth-core".to_string());
        let access_minutes: i64 = std::env::var("JWT_ACCESS_TOKEN_EXPIRE_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let refresh_days: i64 = std::env::var("JWT_REFRESH_TOKEN_EXPIRE_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let lifetimes = Lifetimes {
            access: Duration::minutes(access_minutes),
            refresh: Duration::days(refresh_days),
        };

        let algorithm = std::env::var("JWT_ALGORITHM").unwrap_or_else(|_| "RS256".to_string());

        if algorithm.starts_with("RS") {
            let private_path = std::env::var("JWT_PRIVATE_KEY_PATH").ok();
            let public_path = std::env::var("JWT_PUBLIC_KEY_PATH").ok();

            let (private_path, public_path) = match (private_path, public_path) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    if is_production {
                        return Err(anyhow!(
                            "production requires JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH for {algorithm}"
                        ));
                    }
                    return Self::from_hmac_env(is_production, issuer, lifetimes);
                }
            };

            let key = Self::load_rsa_key_pair(&private_path, &public_path, "auth-core-key-1", is_production)?;

            if is_production {
                validate_volatile_store_url_for_production()?;
            }

            return Ok(Self { key, issuer, lifetimes });
        }

        Self::from_hmac_env(is_production, issuer, lifetimes)
    }

    fn load_rsa_key_pair(
        private_path: &str,
        public_path: &str,
        kid: &str,
        is_production: bool,
    ) -> Result<SigningKey> {
        let private_pem = std::fs::read_to_string(private_path)
            .with_context(|| format!("reading JWT_PRIVATE_KEY_PATH={private_path}"))?;
        let public_pem = std::fs::read_to_string(public_path)
            .with_context(|| format!("reading JWT_PUBLIC_KEY_PATH={public_path}"))?;

        Self::validate_pem_shaped(&private_pem, "PRIVATE KEY", is_production)?;
        Self::validate_pem_shaped(&public_pem, "PUBLIC KEY", is_production)?;

        let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).context("parsing RSA private key")?;
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes()).context("parsing RSA public key")?;
        let public_key = parse_rsa_public_key(&public_pem)?;

        Ok(SigningKey::Rsa { encoding, decoding, kid: kid.to_string(), public_key })
    }

    fn from_hmac_env(is_production: bool, issuer: String, lifetimes: Lifetimes) -> Result<Self> {
        if is_production {
            return Err(anyhow!(
                "production refuses HS256: a shared-secret MAC is only allowed outside production"
            ));
        }

        let secret = std::env::var("JWT_SECRET_KEY")
            .context("JWT_SECRET_KEY must be set when JWT_ALGORITHM is HS256")?;

        let lowered = secret.to_lowercase();
        if WEAK_SECRET_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return Err(anyhow!("JWT_SECRET_KEY matches a known-weak pattern"));
        }
        if validate_secret_strength(&secret)? == SecretStrength::Weak {
            return Err(anyhow!(
                "JWT_SECRET_KEY is too short or too low-entropy (need >= 32 bytes with sufficient randomness)"
            ));
        }

        Ok(Self { key: SigningKey::Hmac { secret }, issuer, lifetimes })
    }

    fn validate_pem_shaped(pem: &str, marker: &str, is_production: bool) -> Result<()> {
        let shaped = pem.contains(&format!("BEGIN {marker}")) || pem.contains("BEGIN RSA");
        if pem.trim().is_empty() || !shaped {
            if is_production {
                return Err(anyhow!("key file is empty or not PEM-shaped"));
            }
        }
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        match &self.key {
            SigningKey::Rsa { .. } => Algorithm::RS256,
            SigningKey::Hmac { .. } => Algorithm::HS256,
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        match &self.key {
            SigningKey::Rsa { encoding, .. } => encoding.clone(),
            SigningKey::Hmac { secret } => EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn decoding_key(&self) -> DecodingKey {
        match &self.key {
            SigningKey::Rsa { decoding, .. } => decoding.clone(),
            SigningKey::Hmac { secret } => DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn issue(
        &self,
        sub: &str,
        token_type: CredentialType,
        ttl: Duration,
        email: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
        extra: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            email: email.to_string(),
            roles,
            permissions,
            token_type: token_type.as_str().to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            extra,
        };

        let mut header = Header::new(self.algorithm());
        if let SigningKey::Rsa { kid, .. } = &self.key {
            header.kid = Some(kid.clone());
        }

        encode(&header, &claims, &self.encoding_key()).context("signing credential")
    }

    /// `issue_access(principal_id, email, roles, permissions, extra) -> string`.
    pub fn issue_access(
        &self,
        principal_id: i64,
        email: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
        extra: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        self.issue(
            &principal_id.to_string(),
            CredentialType::Access,
            self.lifetimes.access,
            email,
            roles,
            permissions,
            extra,
        )
    }

    /// `issue_refresh(principal_id) -> string`. No profile claims.
    pub fn issue_refresh(&self, principal_id: i64) -> Result<String> {
        self.issue(
            &principal_id.to_string(),
            CredentialType::Refresh,
            self.lifetimes.refresh,
            "",
            Vec::new(),
            Vec::new(),
            HashMap::new(),
        )
    }

    /// `issue_mfa_pending(principal_id) -> string`, five-minute lifetime.
    pub fn issue_mfa_pending(&self, principal_id: i64) -> Result<String> {
        self.issue(
            &principal_id.to_string(),
            CredentialType::MfaPending,
            Duration::minutes(5),
            "",
            Vec::new(),
            Vec::new(),
            HashMap::new(),
        )
    }

    /// `issue_password_reset(principal_id) -> string`, one-hour lifetime.
    pub fn issue_password_reset(&self, principal_id: i64) -> Result<String> {
        self.issue(
            &principal_id.to_string(),
            CredentialType::PasswordReset,
            Duration::hours(1),
            "",
            Vec::new(),
            Vec::new(),
            HashMap::new(),
        )
    }

    /// Validates signature, issuer, and time fields. Does NOT check
    /// blacklist or active-set membership — that's the registry's job.
    pub fn decode(&self, token: &str) -> Result<Claims, CodecError> {
        let mut validation = Validation::new(self.algorithm());
        validation.set_issuer(&[self.issuer.clone()]);
        validation.validate_exp = true;
        validation.leeway = 30;

        let data = decode::<Claims>(token, &self.decoding_key(), &validation)?;
        Ok(data.claims)
    }

    /// Publishes the public key as a real JWK (`n`, `e`) alongside `kid`,
    /// `use="sig"`, `alg`, `kty` — enough for a peer to verify a credential
    /// without ever seeing the private half. An HMAC-keyed codec publishes an
    /// empty key set — there is no public half of a shared secret to hand to
    /// peer services.
    pub fn jwks(&self) -> serde_json::Value {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rsa::traits::PublicKeyParts;

        let mut keys = Vec::new();
        if let SigningKey::Rsa { kid, public_key, .. } = &self.key {
            keys.push(json!({
                "kid": kid,
                "use": "sig",
                "alg": "RS256",
                "kty": "RSA",
                "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }));
        }
        json!({ "keys": keys })
    }
}

/// RSA public keys are accepted either as PKCS#8 SPKI (`BEGIN PUBLIC KEY`) or
/// PKCS#1 (`BEGIN RSA PUBLIC KEY`); try both since `validate_pem_shaped`
/// accepts either shape.
fn parse_rsa_public_key(pem: &str) -> Result<rsa::RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;

    if let Ok(key) = rsa::RsaPublicKey::from_public_key_pem(pem) {
        return Ok(key);
    }
    rsa::RsaPublicKey::from_pkcs1_pem(pem).context("parsing RSA public key for JWKS")
}

fn validate_volatile_store_url_for_production() -> Result<()> {
    let url = std::env::var("REDIS_URL").unwrap_or_default();
    let lowered = url.to_lowercase();
    if lowered.contains("localhost") || lowered.contains("127.0.0.1") {
        return Err(anyhow!("production REDIS_URL must not point at localhost"));
    }
    if !lowered.starts_with("rediss://") && !lowered.contains("ssl=true") {
        return Err(anyhow!("production REDIS_URL must use transport encryption (rediss://)"));
    }
    Ok(())
}

pub type SharedCodec = std::sync::Arc<CredentialCodec>;

impl CredentialCodec {
    /// Build an HMAC-keyed codec directly from a secret, bypassing
    /// `from_env`'s production checks. For test fixtures and other crates'
    /// unit tests that need a codec without an environment to read.
    pub fn for_tests(secret: &str) -> Self {
        Self {
            key: SigningKey::Hmac { secret: secret.to_string() },
            issuer: "auth-core-test".to_string(),
            lifetimes: Lifetimes { access: Duration::minutes(30), refresh: Duration::days(30) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmac_codec() -> CredentialCodec {
        CredentialCodec {
            key: SigningKey::Hmac { secret: "unit-test-signing-key-that-is-long-enough".to_string() },
            issuer: "auth-core-test".to_string(),
            lifetimes: Lifetimes { access: Duration::minutes(30), refresh: Duration::days(30) },
        }
    }

    fn rsa_codec(kid: &str) -> CredentialCodec {
        // Public key components only matter for the JWK-shape assertions
        // below; signing/verification in these tests goes through the HMAC
        // codec instead, so the encoding/decoding keys are placeholders.
        let n = rsa::BigUint::from_bytes_be(&[0xAA; 32]);
        let e = rsa::BigUint::from(65537u32);
        let public_key = rsa::RsaPublicKey::new(n, e).expect("valid rsa public key for test");

        CredentialCodec {
            key: SigningKey::Rsa {
                encoding: EncodingKey::from_secret(b"placeholder"),
                decoding: DecodingKey::from_secret(b"placeholder"),
                kid: kid.to_string(),
                public_key,
            },
            issuer: "auth-core-test".to_string(),
            lifetimes: Lifetimes { access: Duration::minutes(30), refresh: Duration::days(30) },
        }
    }

    #[test]
    fn round_trip_access_token_preserves_profile_claims() {
        let codec = hmac_codec();
        let token = codec
            .issue_access(42, "user@example.com", vec!["admin".into()], vec!["auth:read".into()], HashMap::new())
            .unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.roles, vec!["admin".to_string()]);
        assert_eq!(claims.permissions, vec!["auth:read".to_string()]);
        assert_eq!(claims.token_type, "access");
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn refresh_token_carries_no_profile_claims() {
        let codec = hmac_codec();
        let token = codec.issue_refresh(7).unwrap();
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.token_type, "refresh");
        assert!(claims.roles.is_empty());
        assert!(claims.email.is_empty());
    }

    #[test]
    fn two_issuances_produce_distinct_jtis() {
        let codec = hmac_codec();
        let a = codec.decode(&codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap()).unwrap();
        let b = codec.decode(&codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn expired_credential_reports_expired_not_malformed() {
        let mut codec = hmac_codec();
        codec.lifetimes.access = Duration::seconds(-5);
        let token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        let err = codec.decode(&token).unwrap_err();
        assert!(matches!(err, CodecError::Expired));
    }

    #[test]
    fn tampered_signature_is_malformed() {
        let codec = hmac_codec();
        let mut token = codec.issue_access(1, "a@x.com", vec![], vec![], HashMap::new()).unwrap();
        token.push('x');
        let err = codec.decode(&token).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn mfa_pending_and_password_reset_have_fixed_lifetimes() {
        let codec = hmac_codec();
        let mfa = codec.decode(&codec.issue_mfa_pending(1).unwrap()).unwrap();
        assert_eq!(mfa.exp - mfa.iat, 5 * 60);

        let reset = codec.decode(&codec.issue_password_reset(1).unwrap()).unwrap();
        assert_eq!(reset.exp - reset.iat, 60 * 60);
    }

    #[test]
    fn jwks_publishes_a_verifiable_key() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rsa::traits::PublicKeyParts;

        let codec = rsa_codec("auth-core-key-1");
        let doc = codec.jwks();
        assert_eq!(doc["keys"][0]["kid"], "auth-core-key-1");
        assert_eq!(doc["keys"][0]["use"], "sig");
        assert_eq!(doc["keys"][0]["kty"], "RSA");

        let SigningKey::Rsa { public_key, .. } = &codec.key else { panic!("expected rsa key") };
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        assert_eq!(doc["keys"][0]["n"], n);
        assert_eq!(doc["keys"][0]["e"], e);
    }

    #[test]
    fn hmac_codec_publishes_an_empty_key_set() {
        let codec = hmac_codec();
        let doc = codec.jwks();
        assert!(doc["keys"].as_array().unwrap().is_empty());
    }
}
