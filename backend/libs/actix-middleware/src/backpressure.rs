//! Request backpressure: a bounded semaphore in front of the handler pool,
//! with a queue-capacity shed and a reject threshold ahead of that, so the
//! service degrades in three distinguishable steps rather than queuing
//! unboundedly until it falls over.
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use error_types::AuthError;
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const BYPASS_PATHS: &[&str] = &["/health", "/metrics", "/api/v1/metrics", "/api/v1/health"];

#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    pub wait_timeout: Duration,
    /// Defaults to `max_concurrent + queue_capacity` when `None`.
    pub reject_threshold: Option<usize>,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_capacity: 1000,
            wait_timeout: Duration::from_secs(3),
            reject_threshold: None,
        }
    }
}

impl BackpressureConfig {
    pub fn from_env() -> Self {
        let enabled = std::env::var("BACKPRESSURE_ENABLE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        if !enabled {
            // An effectively-unbounded config disables shedding without a
            // second code path: callers that want backpressure off just
            // install a config with headroom no real load will reach.
            return Self {
                max_concurrent: usize::MAX / 4,
                queue_capacity: usize::MAX / 4,
                wait_timeout: Duration::from_secs(3600),
                reject_threshold: None,
            };
        }
        Self {
            max_concurrent: std::env::var("BACKPRESSURE_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            queue_capacity: std::env::var("BACKPRESSURE_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            wait_timeout: Duration::from_secs_f64(
                std::env::var("BACKPRESSURE_WAIT_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3.0),
            ),
            reject_threshold: None,
        }
    }

    fn reject_threshold(&self) -> usize {
        self.reject_threshold.unwrap_or(self.max_concurrent + self.queue_capacity)
    }
}

#[derive(Debug, Default)]
struct Counters {
    inflight: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, serde::Serialize)]
pub struct BackpressureStatus {
    pub inflight: u64,
    pub queued: u64,
    pub total: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub utilization_percent: f64,
    pub status: HealthStatus,
}

/// Shared state the middleware instances (one per worker) and a `/health`
/// handler both read. Cloning `Backpressure` clones the `Arc` — all clones
/// observe the same semaphore and counters.
#[derive(Clone)]
pub struct Backpressure {
    semaphore: Arc<Semaphore>,
    config: Arc<BackpressureConfig>,
    counters: Arc<Counters>,
}

impl Backpressure {
    pub fn new(config: BackpressureConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self { semaphore, config: Arc::new(config), counters: Arc::new(Counters::default()) }
    }

    pub fn status(&self) -> BackpressureStatus {
        let inflight = self.counters.inflight.load(Ordering::Relaxed);
        let queued = self.counters.queued.load(Ordering::Relaxed);
        let utilization = inflight as f64 / self.config.max_concurrent as f64;
        let status = if utilization < 0.70 {
            HealthStatus::Healthy
        } else if utilization < 0.85 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };
        BackpressureStatus {
            inflight,
            queued,
            total: self.counters.total.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            utilization_percent: utilization * 100.0,
            status,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Backpressure
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = BackpressureService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BackpressureService { service: Rc::new(service), state: self.clone() }))
    }
}

pub struct BackpressureService<S> {
    service: Rc<S>,
    state: Backpressure,
}

impl<S, B> Service<ServiceRequest> for BackpressureService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if BYPASS_PATHS.contains(&req.path()) {
            let service = self.service.clone();
            return Box::pin(async move { service.call(req).await });
        }

        let service = self.service.clone();
        let state = self.state.clone();

        Box::pin(async move {
            state.counters.total.fetch_add(1, Ordering::Relaxed);

            let inflight = state.counters.inflight.load(Ordering::Relaxed);
            let queued = state.counters.queued.load(Ordering::Relaxed);

            if inflight + queued >= state.config.reject_threshold() as u64 {
                state.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AuthError::SystemOverload.into());
            }

            if queued >= state.config.queue_capacity as u64 {
                state.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AuthError::QueueFull.into());
            }

            state.counters.queued.fetch_add(1, Ordering::Relaxed);
            let wait_start = Instant::now();

            let permit = tokio::time::timeout(
                state.config.wait_timeout,
                state.semaphore.clone().acquire_owned(),
            )
            .await;

            state.counters.queued.fetch_sub(1, Ordering::Relaxed);

            let permit = match permit {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    // Semaphore closed — never happens, we hold the only Arc
                    // that would close it, but propagate defensively.
                    return Err(AuthError::SystemOverload.into());
                }
                Err(_) => {
                    state.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    return Err(AuthError::QueueTimeout.into());
                }
            };

            state.counters.inflight.fetch_add(1, Ordering::Relaxed);
            let wait_time = wait_start.elapsed();

            let result = service.call(req).await;
            state.counters.inflight.fetch_sub(1, Ordering::Relaxed);
            drop(permit);

            let mut res = result?;
            if wait_time > Duration::from_millis(100) {
                res.headers_mut().insert(
                    actix_web::http::header::HeaderName::from_static("x-queue-wait-time"),
                    actix_web::http::header::HeaderValue::from_str(&format!("{:.3}", wait_time.as_secs_f64()))
                        .unwrap(),
                );
            }
            res.headers_mut().insert(
                actix_web::http::header::HeaderName::from_static("x-queue-status"),
                actix_web::http::header::HeaderValue::from_static("processed"),
            );
            Ok(res)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_threshold_defaults_to_sum_of_capacities() {
        let config = BackpressureConfig { max_concurrent: 10, queue_capacity: 20, ..Default::default() };
        assert_eq!(config.reject_threshold(), 30);
    }

    #[test]
    fn health_status_thresholds_match_spec() {
        let bp = Backpressure::new(BackpressureConfig { max_concurrent: 100, ..Default::default() });
        bp.counters.inflight.store(60, Ordering::Relaxed);
        assert_eq!(bp.status().status, HealthStatus::Healthy);
        bp.counters.inflight.store(80, Ordering::Relaxed);
        assert_eq!(bp.status().status, HealthStatus::Warning);
        bp.counters.inflight.store(90, Ordering::Relaxed);
        assert_eq!(bp.status().status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn semaphore_admits_up_to_capacity() {
        let bp = Backpressure::new(BackpressureConfig { max_concurrent: 2, ..Default::default() });
        let p1 = bp.semaphore.clone().acquire_owned().await.unwrap();
        let p2 = bp.semaphore.clone().acquire_owned().await.unwrap();
        assert_eq!(bp.semaphore.available_permits(), 0);
        drop(p1);
        drop(p2);
        assert_eq!(bp.semaphore.available_permits(), 2);
    }

    #[actix_web::test]
    async fn fast_uncontended_requests_still_get_x_queue_status() {
        use actix_web::{test, web, App, HttpResponse};

        let bp = Backpressure::new(BackpressureConfig::default());
        let app = test::init_service(
            App::new().wrap(bp).route("/thing", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::get().uri("/thing").to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.headers().get("x-queue-status").unwrap(), "processed");
        assert!(res.headers().get("x-queue-wait-time").is_none());
    }
}
