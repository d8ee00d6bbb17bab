use actix_middleware::client_ip::TrustedProxies;
use actix_middleware::rate_limit::{RateLimitMiddleware, RouteBucket, RouteBuckets};
use actix_web::{test, web, App, HttpResponse};
use redis_utils::{InMemoryStore, VolatileStore};
use std::sync::Arc;

async fn test_handler() -> HttpResponse {
    HttpResponse::Ok().body("success")
}

fn strict_buckets() -> RouteBuckets {
    RouteBuckets::new(
        vec![RouteBucket { path_prefix: "/test", max_requests: 2, window_seconds: 10 }],
        RouteBucket { path_prefix: "/api", max_requests: 100, window_seconds: 60 },
        RouteBucket { path_prefix: "", max_requests: 1000, window_seconds: 60 },
    )
}

#[actix_web::test]
async fn third_request_in_window_is_rate_limited() {
    let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
    let middleware = RateLimitMiddleware::new(store, strict_buckets(), TrustedProxies::default());

    let app = test::init_service(
        App::new().wrap(middleware).route("/test", web::get().to(test_handler)),
    )
    .await;

    for _ in 0..2 {
        let req = test::TestRequest::get().uri("/test").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    let req = test::TestRequest::get().uri("/test").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
}

#[actix_web::test]
async fn options_requests_bypass_the_filter() {
    let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
    let middleware = RateLimitMiddleware::new(store, strict_buckets(), TrustedProxies::default());

    let app = test::init_service(
        App::new()
            .wrap(middleware)
            .route("/test", web::route().to(test_handler)),
    )
    .await;

    for _ in 0..10 {
        let req = test::TestRequest::with_uri("/test")
            .method(actix_web::http::Method::OPTIONS)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}

#[actix_web::test]
async fn distinct_clients_get_independent_counters() {
    let store: Arc<dyn VolatileStore> = Arc::new(InMemoryStore::new());
    let middleware = RateLimitMiddleware::new(store, strict_buckets(), TrustedProxies::default());

    let app = test::init_service(
        App::new().wrap(middleware).route("/test", web::get().to(test_handler)),
    )
    .await;

    for ip in ["203.0.113.1", "203.0.113.2"] {
        for _ in 0..2 {
            let req = test::TestRequest::get()
                .uri("/test")
                .peer_addr(format!("{ip}:443").parse().unwrap())
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_success(), "client {ip} should not be limited yet");
        }
    }
}
