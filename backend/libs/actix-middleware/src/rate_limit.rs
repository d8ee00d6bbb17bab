//! Per-`(client_id, route-bucket)` fixed-window rate limiting.
//!
//! Route buckets are a table keyed by path prefix, each with its own
//! `(max_requests, window_seconds)`. `OPTIONS` requests (CORS preflight)
//! bypass the filter entirely. The counter itself is `incr_with_initial_ttl`
//! against the shared [`VolatileStore`] — the same trait the credential
//! registry uses — so the "first writer sets the TTL" atomicity the fixed
//! window depends on is guaranteed by the store, not by this middleware.
//!
//! When the store is unreachable the filter falls back to a local,
//! per-process counter keyed the same way: a node degrades to per-process
//! limiting rather than admitting unconditionally. This is the fail-closed
//! posture §7 requires of the admission layer.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use error_types::AuthError;
use futures::future::{ready, Ready};
use redis_utils::VolatileStore;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::client_ip::{client_id_from_service_request, TrustedProxies};

/// Health/metrics routes are exempt from both admission filters (§4.5) —
/// mirrors `backpressure::BYPASS_PATHS`.
const BYPASS_PATHS: &[&str] = &["/health", "/metrics", "/api/v1/metrics", "/api/v1/health"];

/// One entry in the route-bucket table: requests matching `path_prefix` are
/// limited to `max_requests` per `window_seconds`, independent of every
/// other bucket.
#[derive(Debug, Clone)]
pub struct RouteBucket {
    pub path_prefix: &'static str,
    pub max_requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RouteBuckets {
    buckets: Vec<RouteBucket>,
    default_api: RouteBucket,
    default_other: RouteBucket,
}

impl Default for RouteBuckets {
    fn default() -> Self {
        Self {
            buckets: vec![
                RouteBucket { path_prefix: "/api/v1/auth/login", max_requests: 5, window_seconds: 60 },
                RouteBucket { path_prefix: "/api/v1/auth/refresh", max_requests: 10, window_seconds: 60 },
                RouteBucket { path_prefix: "/api/v1/auth/logout", max_requests: 20, window_seconds: 60 },
            ],
            default_api: RouteBucket { path_prefix: "/api", max_requests: 100, window_seconds: 60 },
            default_other: RouteBucket { path_prefix: "", max_requests: 1000, window_seconds: 60 },
        }
    }
}

impl RouteBuckets {
    pub fn new(buckets: Vec<RouteBucket>, default_api: RouteBucket, default_other: RouteBucket) -> Self {
        Self { buckets, default_api, default_other }
    }

    /// Longest-prefix match against the declared table; anything under
    /// `/api/*` with no specific entry falls to the looser default API
    /// bucket, everything else to the far-looser catch-all.
    fn resolve(&self, path: &str) -> &RouteBucket {
        self.buckets
            .iter()
            .filter(|b| path.starts_with(b.path_prefix))
            .max_by_key(|b| b.path_prefix.len())
            .unwrap_or_else(|| {
                if path.starts_with("/api") {
                    &self.default_api
                } else {
                    &self.default_other
                }
            })
    }
}

#[derive(Default)]
struct LocalCounter {
    counts: HashMap<String, (u32, Instant)>,
}

/// Fallback used only when the volatile store is failing; per-process, not
/// distributed, but keeps a single node from admitting everything.
#[derive(Clone, Default)]
struct LocalFallback {
    inner: Arc<Mutex<LocalCounter>>,
}

impl LocalFallback {
    async fn incr(&self, key: &str, window: Duration) -> u32 {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let entry = guard.counts.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= window {
            entry.0 = 0;
            entry.1 = now;
        }
        entry.0 += 1;
        if guard.counts.len() > 50_000 {
            guard.counts.retain(|_, (_, start)| now.duration_since(*start) < window * 2);
        }
        guard.counts.get(key).map(|e| e.0).unwrap_or(1)
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware {
    store: Arc<dyn VolatileStore>,
    buckets: RouteBuckets,
    trusted: TrustedProxies,
    fallback: LocalFallback,
}

impl RateLimitMiddleware {
    pub fn new(store: Arc<dyn VolatileStore>, buckets: RouteBuckets, trusted: TrustedProxies) -> Self {
        Self { store, buckets, trusted, fallback: LocalFallback::default() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService { service: Rc::new(service), state: self.clone() }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    state: RateLimitMiddleware,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        if req.method() == actix_web::http::Method::OPTIONS || BYPASS_PATHS.contains(&req.path()) {
            let service = self.service.clone();
            return Box::pin(async move { service.call(req).await });
        }

        let service = self.service.clone();
        let state = self.state.clone();

        Box::pin(async move {
            let path = req.path().to_string();
            let bucket = state.buckets.resolve(&path).clone();
            let client = client_id_from_service_request(&req, &state.trusted);
            let key = format!("ratelimit:{}:{}", client, bucket.path_prefix);
            let window = Duration::from_secs(bucket.window_seconds);

            let count = match state.store.incr_with_initial_ttl(&key, window).await {
                Ok(count) => count as u64,
                Err(err) => {
                    tracing::warn!(error = %err, %key, "volatile store unreachable, using local fallback counter");
                    state.fallback.incr(&key, window).await as u64
                }
            };

            if count > bucket.max_requests as u64 {
                req.extensions_mut().insert(client.clone());
                return Err(AuthError::RateLimited {
                    retry_after_secs: bucket.window_seconds,
                    limit: bucket.max_requests,
                    window_secs: bucket.window_seconds,
                }
                .into());
            }

            req.extensions_mut().insert(client);
            service.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis_utils::InMemoryStore;

    #[test]
    fn resolve_prefers_longest_matching_prefix() {
        let buckets = RouteBuckets::default();
        let b = buckets.resolve("/api/v1/auth/login");
        assert_eq!(b.path_prefix, "/api/v1/auth/login");
        assert_eq!(b.max_requests, 5);
    }

    #[test]
    fn resolve_falls_back_to_default_api_bucket() {
        let buckets = RouteBuckets::default();
        let b = buckets.resolve("/api/v1/auth/sessions");
        assert_eq!(b.path_prefix, "/api");
    }

    #[test]
    fn resolve_falls_back_to_catch_all_outside_api() {
        let buckets = RouteBuckets::default();
        let b = buckets.resolve("/health");
        assert_eq!(b.max_requests, 1000);
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_denied() {
        let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
        let bucket = RouteBucket { path_prefix: "/x", max_requests: 5, window_seconds: 60 };
        for i in 1..=5 {
            let count = store.incr_with_initial_ttl("k", Duration::from_secs(60)).await.unwrap();
            assert_eq!(count, i);
            assert!(count as u32 <= bucket.max_requests);
        }
        let sixth = store.incr_with_initial_ttl("k", Duration::from_secs(60)).await.unwrap();
        assert!(sixth as u32 > bucket.max_requests);
    }

    #[test]
    fn health_and_metrics_paths_are_in_the_bypass_list() {
        assert!(BYPASS_PATHS.contains(&"/health"));
        assert!(BYPASS_PATHS.contains(&"/metrics"));
    }

    #[tokio::test]
    async fn local_fallback_counts_independently_of_the_store() {
        let fallback = LocalFallback::default();
        let window = Duration::from_secs(60);
        for i in 1..=5u32 {
            assert_eq!(fallback.incr("k", window).await, i);
        }
    }
}
