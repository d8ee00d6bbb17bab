//! Unified actix-web middleware for the credential/admission core.
//!
//! ## Modules
//! - `client_ip`: trusted-proxy-aware client identity derivation
//! - `backpressure`: bounded concurrency with queueing and load shedding
//! - `rate_limit`: Redis-backed per-route rate limiting
//! - `jwt_auth`: bearer-credential verification gate
//! - `metrics`: Prometheus request metrics
//! - `correlation_id`: request correlation ID propagation
//! - `logging`: structured request/response logging

pub mod backpressure;
pub mod client_ip;
pub mod correlation_id;
pub mod jwt_auth;
pub mod logging;
pub mod metrics;
pub mod rate_limit;

pub use backpressure::{Backpressure, BackpressureConfig, BackpressureStatus, HealthStatus};
pub use client_ip::{client_id, client_id_from_service_request, TrustedProxies};
pub use correlation_id::{get_correlation_id, CorrelationIdMiddleware};
pub use jwt_auth::{VerificationGate, VerifiedPrincipal};
pub use logging::Logging;
pub use metrics::MetricsMiddleware;
pub use rate_limit::{RateLimitMiddleware, RouteBucket, RouteBuckets};
