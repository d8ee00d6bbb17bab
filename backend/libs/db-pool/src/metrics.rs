//! Prometheus metrics for database connection pool
//!
//! Tracks pool size, connection acquisition latency, and errors

use prometheus::{register_histogram_vec, register_int_gauge_vec, HistogramVec, IntGaugeVec};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::fmt;
use std::time::Instant;

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time to acquire a connection from the pool
    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connection acquisition errors by type
    static ref DB_POOL_CONNECTION_ERRORS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connection_errors_total",
        "Connection acquisition errors",
        &["service", "error_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Update connection pool metrics (called periodically)
pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;
    let active = size - idle;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(active);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(pool.options().get_max_connections() as i64);
}

/// Acquire a connection from the pool and record metrics
///
/// This is a drop-in replacement for `pool.acquire().await` that automatically
/// tracks acquisition latency and error rates.
pub async fn acquire_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<PoolConnection<Postgres>, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;

    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        let error_type = match e {
            sqlx::Error::PoolTimedOut => "timeout",
            sqlx::Error::PoolClosed => "closed",
            _ => "other",
        };

        DB_POOL_CONNECTION_ERRORS
            .with_label_values(&[service, error_type])
            .inc();
    }

    result
}

/// Pool utilization threshold past which the pool is considered under
/// pressure. Distinct from the HTTP-facing admission layer in
/// `actix-middleware`: this one reflects database connection exhaustion and
/// feeds the `database` component of `/health`.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

impl BackpressureConfig {
    pub fn from_env() -> Self {
        let threshold = std::env::var("DB_POOL_BACKPRESSURE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(0.85);
        Self { threshold }
    }
}

#[derive(Debug)]
pub struct PoolExhaustedError {
    pub service: String,
    pub utilization: f64,
    pub threshold: f64,
}

impl fmt::Display for PoolExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool for {} at {:.2}% utilization exceeds {:.2}% threshold",
            self.service,
            self.utilization * 100.0,
            self.threshold * 100.0
        )
    }
}

impl std::error::Error for PoolExhaustedError {}

/// Acquire a connection, rejecting up front if the pool is already past its
/// configured utilization threshold rather than queuing behind it.
pub async fn acquire_with_backpressure(
    pool: &PgPool,
    service: &str,
    config: &BackpressureConfig,
) -> Result<PoolConnection<Postgres>, PoolExhaustedError> {
    let max = pool.options().get_max_connections().max(1) as f64;
    let in_use = (pool.size() as i64 - pool.num_idle() as i64).max(0) as f64;
    let utilization = in_use / max;

    if utilization >= config.threshold {
        return Err(PoolExhaustedError {
            service: service.to_string(),
            utilization,
            threshold: config.threshold,
        });
    }

    acquire_with_metrics(pool, service)
        .await
        .map_err(|_| PoolExhaustedError {
            service: service.to_string(),
            utilization,
            threshold: config.threshold,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_config_default_threshold() {
        assert_eq!(BackpressureConfig::default().threshold, 0.85);
    }

    #[test]
    fn pool_exhausted_error_display_contains_percentages() {
        let error = PoolExhaustedError {
            service: "auth-service".to_string(),
            utilization: 0.92,
            threshold: 0.85,
        };
        let msg = error.to_string();
        assert!(msg.contains("auth-service"));
        assert!(msg.contains("92.00%"));
        assert!(msg.contains("85.00%"));
    }
}
