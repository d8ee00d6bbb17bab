//! Typed process configuration (§10). Built once at startup from the
//! environment; nothing in the request path reads `std::env::var` directly.
//! `Config::from_env()` collects every missing/invalid variable before
//! returning, so a misconfigured deploy gets one complete error instead of
//! failing, being fixed, and failing again on the next variable.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub primary_url: String,
    pub replica_url: Option<String>,
    pub pool_min_size: u32,
    pub pool_max_size: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub algorithm: String,
    pub issuer: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
}

impl JwtConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs((self.access_token_expire_minutes.max(0) as u64) * 60)
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub sentinel_endpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_failed_attempts: u32,
    pub lockout_minutes: u64,
}

impl PasswordConfig {
    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_minutes * 60)
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub env: String,
    pub server_host: String,
    pub server_port: u16,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub redis: RedisConfig,
    pub password: PasswordConfig,
    pub backpressure: actix_middleware::BackpressureConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T, errors: &mut Vec<String>) -> T {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            errors.push(format!("{key}={raw:?} is not a valid value"));
            default
        }),
    }
}

impl Config {
    /// Load and validate every variable at once; `.env` is loaded first in
    /// non-production environments so local development doesn't need a real
    /// shell export for every key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = env_or("ENV", "development");
        if env != "production" {
            let _ = dotenv::dotenv();
        }

        let mut errors = Vec::new();

        let primary_url = std::env::var("DB_PRIMARY_DB_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_else(|_| {
                errors.push("DB_PRIMARY_DB_URL (or DATABASE_URL) is required".to_string());
                String::new()
            });
        let replica_url = std::env::var("DB_REPLICA_DB_URL").ok();

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            errors.push("REDIS_URL is required".to_string());
            String::new()
        });

        let config = Self {
            service_name: env_or("SERVICE_NAME", "auth-service"),
            env: env.clone(),
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: parse_env("SERVER_PORT", 8080u16, &mut errors),
            database: DatabaseConfig {
                primary_url,
                replica_url,
                pool_min_size: parse_env("DB_POOL_MIN_SIZE", 20u32, &mut errors),
                pool_max_size: parse_env("DB_POOL_MAX_SIZE", 100u32, &mut errors),
            },
            jwt: JwtConfig {
                algorithm: env_or("JWT_ALGORITHM", "RS256"),
                issuer: env_or("JWT_ISSUER", "auth-core"),
                access_token_expire_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRE_MINUTES", 30i64, &mut errors),
                refresh_token_expire_days: parse_env("JWT_REFRESH_TOKEN_EXPIRE_DAYS", 30i64, &mut errors),
            },
            redis: RedisConfig {
                url: redis_url,
                sentinel_endpoints: std::env::var("REDIS_SENTINEL_ENDPOINTS")
                    .ok()
                    .map(|raw| redis_utils::parse_sentinel_endpoints(&raw)),
            },
            password: PasswordConfig {
                min_length: parse_env("PASSWORD_MIN_LENGTH", 8usize, &mut errors),
                max_failed_attempts: parse_env("PASSWORD_MAX_FAILED_ATTEMPTS", 5u32, &mut errors),
                lockout_minutes: parse_env("PASSWORD_LOCKOUT_MINUTES", 15u64, &mut errors),
            },
            backpressure: actix_middleware::BackpressureConfig::from_env(),
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
            },
        };

        if env == "production" && config.database.primary_url.contains("localhost") {
            errors.push("production DB_PRIMARY_DB_URL must not point at localhost".to_string());
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError(errors))
        }
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn from_env_reports_every_missing_required_variable_at_once() {
        std::env::remove_var("DB_PRIMARY_DB_URL");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("REDIS_URL");
        std::env::set_var("ENV", "test");

        let err = Config::from_env().unwrap_err();
        assert!(err.0.iter().any(|m| m.contains("DB_PRIMARY_DB_URL")));
        assert!(err.0.iter().any(|m| m.contains("REDIS_URL")));

        std::env::remove_var("ENV");
    }

    #[test]
    #[serial_test::serial]
    fn production_refuses_localhost_database() {
        std::env::set_var("ENV", "production");
        std::env::set_var("DB_PRIMARY_DB_URL", "postgres://localhost/auth");
        std::env::set_var("REDIS_URL", "rediss://redis.internal:6380");

        let err = Config::from_env().unwrap_err();
        assert!(err.0.iter().any(|m| m.contains("localhost")));

        std::env::remove_var("ENV");
        std::env::remove_var("DB_PRIMARY_DB_URL");
        std::env::remove_var("REDIS_URL");
    }
}
