//! Prometheus counters for admission and login outcomes (§11). Registered
//! lazily against the process-wide default registry the first time each is
//! touched; `/metrics` (`metrics_handler`) renders whatever has accumulated.

use actix_web::{HttpResponse, Responder};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => HttpResponse::Ok().content_type(encoder.format_type()).body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help)
        .and_then(|c| {
            prometheus::default_registry().register(Box::new(c.clone()))?;
            Ok(c)
        })
        .unwrap_or_else(|e| {
            tracing::error!("failed to register {} counter: {}", name, e);
            IntCounter::new(format!("dummy_{name}"), "dummy").expect("dummy counter")
        })
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let opts = Opts::new(name, help);
    match IntCounterVec::new(opts, labels) {
        Ok(c) => {
            if let Err(err) = prometheus::default_registry().register(Box::new(c.clone())) {
                tracing::error!("failed to register {} counter: {}", name, err);
            }
            c
        }
        Err(err) => {
            tracing::error!("failed to create {} counter: {}", name, err);
            IntCounterVec::new(Opts::new(format!("dummy_{name}"), "dummy"), labels)
                .expect("dummy counter vec")
        }
    }
}

static LOGIN_REQUESTS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("login_requests_total", "Total number of login requests"));

static LOGIN_FAILURES_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("login_failures_total", "Total number of failed login attempts"));

static ACCOUNT_LOCKOUTS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("account_lockouts_total", "Total number of account lockouts triggered"));

/// Login outcome, partitioned by label (§11) — never by raw email, only the
/// coarse outcome the login coordinator already classifies internally.
static LOGIN_OUTCOMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "login_outcomes_total",
        "Login attempts partitioned by outcome",
        &["outcome"],
    )
});

#[inline]
pub fn inc_login_requests() {
    LOGIN_REQUESTS_TOTAL.inc();
}

#[inline]
pub fn inc_login_failures() {
    LOGIN_FAILURES_TOTAL.inc();
}

#[inline]
pub fn inc_account_lockouts() {
    ACCOUNT_LOCKOUTS_TOTAL.inc();
}

/// `outcome` is one of `success`, `wrong_password`, `no_such_user`,
/// `locked`, `inactive` — the same strings the login coordinator already
/// uses in its structured-log events.
#[inline]
pub fn inc_login_outcome(outcome: &str) {
    LOGIN_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}
