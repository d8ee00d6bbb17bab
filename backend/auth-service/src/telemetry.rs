//! Structured logging (§11). JSON in production so log shippers can parse it
//! without a regex, human-readable in development. Level is driven by
//! `RUST_LOG` with a per-environment fallback; correlation ids are attached
//! per-request by `actix_middleware::CorrelationIdMiddleware`, not here.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init(env: &str) {
    let default_level = if env == "production" { "info" } else { "debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    if env == "production" {
        subscriber.json().init();
    } else {
        subscriber.pretty().init();
    }
}
